use env_logger::{Builder, Env};
use log::error;

fn init_logger() {
    // Уровень берём из RUST_LOG, иначе дефолт — info.
    // Пример: RUST_LOG=debug ./tkeycompat replay
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    match tkeystore::cli::run() {
        Ok(true) => {}
        // Прогон прошёл, но есть упавшие сценарии.
        Ok(false) => std::process::exit(2),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}
