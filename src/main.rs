fn main() -> std::process::ExitCode {
    signal_etl::run()
}
