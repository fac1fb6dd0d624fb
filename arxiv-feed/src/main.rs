use std::env;
use std::fs;
use std::io::{self, Read};
use std::process;

fn main() {
    if let Err(err) = run() {
        eprintln!("{}: {err}", env!("CARGO_PKG_NAME"));
        process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut args = env::args();
    let program = args
        .next()
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());

    let input = match args.next() {
        Some(flag) if flag == "-h" || flag == "--help" => {
            println!("{}", usage(&program));
            return Ok(());
        }
        Some(flag) if flag == "-V" || flag == "--version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(path) if path == "-" => None,
        Some(path) => Some(path),
        None => None,
    };

    if let Some(extra) = args.next() {
        return Err(format!("unexpected argument: {extra}\n{}", usage(&program)));
    }

    let xml = match input {
        Some(path) => {
            fs::read_to_string(&path).map_err(|err| format!("failed to read '{path}': {err}"))?
        }
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|err| format!("failed to read stdin: {err}"))?;
            buf
        }
    };

    let entries = arxiv_feed::parse_feed(&xml).map_err(|err| err.to_string())?;
    let json = serde_json::to_string_pretty(&entries)
        .map_err(|err| format!("failed to serialize JSON: {err}"))?;
    println!("{json}");
    Ok(())
}

fn usage(program: &str) -> String {
    format!(
        "Usage: {program} [FEED_XML|-]\n\n\
         Reads an arXiv API response and prints its entries as JSON. \
         With no argument or '-', the feed is read from stdin.\n\n\
         Options:\n  -h, --help      Show this message\n  -V, --version   Print package version"
    )
}
