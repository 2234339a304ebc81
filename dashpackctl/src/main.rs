use clap::Parser;

fn main() {
    let cli = dashpackctl::Cli::parse();
    dashpackctl::init_tracing(&cli.log_level);
    if let Err(err) = dashpackctl::run(cli) {
        eprintln!("erro: {err}");
        std::process::exit(1);
    }
}
