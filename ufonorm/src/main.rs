use std::io::Write;

use clap::Parser;
use ufonorm::{run, Args, Error};

fn main() -> Result<(), Error> {
    env_logger::builder()
        .format(|buf, record| {
            let ts = buf.timestamp_micros();
            let level = record.level();
            let style = buf.default_level_style(level);
            writeln!(buf, "{ts}: {style}{level}{style:#}: {}", record.args())
        })
        .init();

    let args = Args::parse();
    run(&args)?;
    Ok(())
}
