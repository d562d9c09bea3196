fn main() -> std::process::ExitCode {
    dremel3d_lib::run()
}
