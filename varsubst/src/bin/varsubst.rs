use std::io::{Read, Write};

use arrrg::CommandLine;

use varsubst::{substitute, variables, CommandLineOptions, Environment, Options};

fn read_input(path: &str) -> Result<String, std::io::Error> {
    if path == "-" {
        let mut input = String::new();
        std::io::stdin().read_to_string(&mut input)?;
        Ok(input)
    } else {
        std::fs::read_to_string(path)
    }
}

fn main() {
    let (cmdline, free) = CommandLineOptions::from_command_line_relaxed(
        "USAGE: varsubst [--no-percent] [--no-dollar] [--lenient] [--list] [FILE ...]",
    );
    let options = Options::from(&cmdline);
    let paths = if free.is_empty() {
        vec!["-".to_string()]
    } else {
        free
    };
    let mut stdout = std::io::stdout().lock();
    for path in paths.iter() {
        let input = match read_input(path) {
            Ok(input) => input,
            Err(err) => {
                eprintln!("varsubst: {path}: {err}");
                std::process::exit(1);
            }
        };
        let output = if cmdline.list {
            variables(&input, &options).map(|names| {
                names
                    .into_iter()
                    .map(|name| name + "\n")
                    .collect::<String>()
            })
        } else {
            substitute(&input, &mut Environment, &options)
        };
        let output = match output {
            Ok(output) => output,
            Err(err) => {
                eprintln!("varsubst: {path}: {err}");
                std::process::exit(1);
            }
        };
        if let Err(err) = stdout.write_all(output.as_bytes()) {
            eprintln!("varsubst: {err}");
            std::process::exit(1);
        }
    }
    if let Err(err) = stdout.flush() {
        eprintln!("varsubst: {err}");
        std::process::exit(1);
    }
}
