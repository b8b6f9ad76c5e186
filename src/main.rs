use ferrum::uci::protocol::run_uci;

fn main() {
    // diagnostics go to stderr; stdout is reserved for the UCI stream
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    ferrum::init_tables();
    run_uci();
}
