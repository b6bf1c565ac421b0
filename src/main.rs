fn main() {
    if let Err(err) = azchat::cli::main() {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}
