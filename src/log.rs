use std::io::Write;

use env_logger::Builder;

pub fn init_log() {
    let mut builder = Builder::from_default_env();
    builder
        .is_test(true)
        .format_timestamp_secs()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} - {}] [{}:{}] {}",
                record.level(),
                record.target(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .try_init()
        .ok();
}
