fn main() -> std::process::ExitCode {
    enrolla_cli::run()
}
