use std::io::{self, IsTerminal, Read};

use cw_core::chat::{run_chat, RunOptions};
use cw_core::config::Config;

fn print_help() {
    println!("chatwidget: chat with a knowledge-base endpoint");
    println!();
    println!("Usage:");
    println!("  chatwidget \"prompt\"           Send a prompt, print the reply as HTML");
    println!("  echo \"prompt\" | chatwidget    Prompt via stdin pipe");
    println!();
    println!("Options:");
    println!("  --debug       Verbose logging to stderr (or set RUST_LOG)");
    println!("  --raw         Print the reply as markdown instead of HTML");
    println!("  --no-history  Neither load nor save conversation history");
    println!("  --events      Print raw protocol events instead of rendering");
    println!("  --version     Print version");
    println!("  --help        Print this help");
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return;
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("chatwidget {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let config = Config::load_or_default();
    init_logging(config.debug || args.iter().any(|a| a == "--debug"));

    let opts = RunOptions {
        raw: args.iter().any(|a| a == "--raw"),
        no_history: args.iter().any(|a| a == "--no-history"),
        events: args.iter().any(|a| a == "--events"),
    };

    if let Some(unknown) = args
        .iter()
        .find(|a| a.starts_with('-') && !matches!(a.as_str(), "--debug" | "--raw" | "--no-history" | "--events"))
    {
        eprintln!("[chat] error: unknown option {unknown}");
        eprintln!("hint: chatwidget --help");
        std::process::exit(2);
    }

    // Positional arg, else piped stdin
    let non_flag_args: Vec<&String> = args.iter().filter(|a| !a.starts_with('-')).collect();
    let prompt = if !non_flag_args.is_empty() {
        non_flag_args
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    } else if !io::stdin().is_terminal() {
        let mut buf = String::new();
        if let Err(e) = io::stdin().read_to_string(&mut buf) {
            eprintln!("[chat] error: failed to read stdin: {e}");
            std::process::exit(1);
        }
        buf.trim().to_string()
    } else {
        String::new()
    };

    if prompt.trim().is_empty() {
        print_help();
        std::process::exit(2);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("[chat] error: failed to create async runtime: {e}");
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(run_chat(&config, &prompt, &opts));
    std::process::exit(code);
}
