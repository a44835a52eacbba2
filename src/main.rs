use colored::Colorize;

fn main() {
    if let Err(e) = starmap::run() {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}
