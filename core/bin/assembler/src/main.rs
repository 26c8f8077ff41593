//! Light CLI wrapper around the `micro4-core-assembler` project.
//! All assembly parsing and building logic is written there.

use std::{process::exit, fs::OpenOptions, io::{stdout, Write}, error::Error};

use clap::{Parser as ClapParser, ValueEnum};
use clap_stdin::FileOrStdin;
use micro4_core_assembler::{Parser, Builder, Tokenizer, Program};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// One hexadecimal digit per nibble: 7500...
    AsciiHex,

    /// One byte per nibble
    Raw,
}

#[derive(ClapParser, Debug)]
struct Args {
    /// Input assembly code file, or `-` to read stdin (end with ^D)
    input: FileOrStdin,

    /// Output format for assembled nibbles
    #[arg(short = 'f', long, default_value = "ascii-hex")]
    output_format: OutputFormat,

    /// Output file, or stdout if not given
    #[arg(short = 'o', long)]
    output_file: Option<String>,

    /// Address to assemble from, until the first `org`
    #[arg(short = 's', long, default_value = "0", value_parser = clap_num::maybe_hex::<u8>)]
    start_address: u8,
}

fn main() {
    let args = Args::parse();

    // Tokenize code
    let code = args.input.to_string();
    let tokens = unwrap_or_abort(Tokenizer::from_str(&code).tokenize(), "Tokenize");

    // Parse code
    let items = unwrap_or_abort(Parser::from_tokens(tokens).parse(), "Parse");

    // Build
    let program = unwrap_or_abort(Builder::build_once(&items, args.start_address), "Build");
    if program.origin != args.start_address {
        eprintln!("Program starts at 0x{:02X}", program.origin);
    }

    if let Err(e) = write_output(&program, args.output_format, args.output_file) {
        eprintln!("Could not write output: {e}");
        exit(1)
    }
}

fn write_output(program: &Program, format: OutputFormat, file: Option<String>) -> std::io::Result<()> {
    let mut output_handle: Box<dyn Write> =
        if let Some(file) = file {
            Box::new(OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(file)?)
        } else {
            Box::new(stdout())
        };

    match format {
        OutputFormat::AsciiHex => {
            output_handle.write_all(program.to_ascii_hex().as_bytes())?;
            output_handle.write_all(b"\n")?;
        },
        OutputFormat::Raw => output_handle.write_all(&program.nibbles)?,
    }
    output_handle.flush()
}

fn unwrap_or_abort<T>(result: Result<T, Vec<impl Error>>, stage: &str) -> T {
    match result {
        Ok(t) => t,
        Err(errors) => {
            eprintln!("{stage} errors occurred.\n");
            for error in errors {
                eprintln!("{error}");
            }
            exit(1)
        }
    }
}
