//! Turns a Micro4 nibble image back into assembly source.
//! Reads the formats `micro4-asm` writes.

use std::{process::exit, fs::OpenOptions, io::{stdout, Write}};

use clap::{Parser, ValueEnum};
use clap_stdin::FileOrStdin;
use micro4_core_instructions::{listing, ListingOptions, MEMORY_SIZE};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum InputFormat {
    /// One hexadecimal digit per nibble, whitespace ignored: 7500...
    AsciiHex,

    /// One byte per nibble
    Raw,
}

#[derive(Parser, Debug)]
struct Args {
    /// Input image file, or `-` to read stdin (end with ^D)
    input: FileOrStdin,

    /// Format of the input image
    #[arg(short = 'f', long, default_value = "ascii-hex")]
    input_format: InputFormat,

    /// Output file, or stdout if not given
    #[arg(short = 'o', long)]
    output_file: Option<String>,

    /// Address the image is loaded at
    #[arg(short = 's', long, default_value = "0", value_parser = clap_num::maybe_hex::<u8>)]
    start_address: u8,

    /// Annotate each line with its address and raw nibbles
    #[arg(short = 'a', long)]
    addresses: bool,

    /// Don't generate labels for branch targets
    #[arg(short = 'l', long)]
    no_labels: bool,
}

fn main() {
    let args = Args::parse();

    let image = match parse_image(args.input.to_string().as_bytes(), args.input_format) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("Invalid image: {e}");
            exit(1)
        }
    };
    if args.start_address as usize + image.len() > MEMORY_SIZE {
        eprintln!("Image runs past the end of memory, ignoring the excess");
    }

    let options = ListingOptions { labels: !args.no_labels, addresses: args.addresses };
    let source = listing(&image, args.start_address, options);

    if let Err(e) = write_output(&source, args.output_file) {
        eprintln!("Could not write output: {e}");
        exit(1)
    }
}

fn parse_image(input: &[u8], format: InputFormat) -> Result<Vec<u8>, String> {
    match format {
        InputFormat::AsciiHex => input.iter()
            .filter(|c| !c.is_ascii_whitespace())
            .map(|c| (*c as char).to_digit(16)
                .map(|d| d as u8)
                .ok_or_else(|| format!("'{}' is not a hex digit", c.escape_ascii())))
            .collect(),
        InputFormat::Raw => match input.iter().position(|n| *n > 0xF) {
            Some(offset) => Err(format!("byte 0x{:02X} at offset {offset} is not a nibble", input[offset])),
            None => Ok(input.to_vec()),
        },
    }
}

fn write_output(source: &str, file: Option<String>) -> std::io::Result<()> {
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

    output_handle.write_all(source.as_bytes())?;
    output_handle.flush()
}
