use chrono::Local;
use env_logger::{Builder, Env};
use log::LevelFilter;
use std::io::Write;

/// Installs the global logger. `RUST_LOG` wins over `default_level`.
pub fn init(default_level: LevelFilter) {
    let env = Env::default().default_filter_or(default_level.as_str());
    let _ = Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .try_init();

    log::debug!("Logger initialized at {}.", default_level);
}
