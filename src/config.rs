//! # Configuration Logic
//!
//! Command-line parsing and validation. Arguments use `key=value` tokens
//! (`in=panel.vcf.gz out=panel.bref4`), with the file format determined by
//! the filename suffix.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Bref4Error, Result};
use crate::io::writer::EncodingParams;

/// Program version, stamped into `bref4Command` meta lines
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// File format selected by a filename suffix
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Vcf,
    Bref4,
}

/// Format implied by a filename, or `None` for unsupported suffixes.
///
/// `-` selects uncompressed VCF on stdin/stdout.
pub fn format_of(name: &str) -> Option<Format> {
    if name == "-"
        || name.ends_with(".vcf")
        || name.ends_with(".vcf.gz")
        || name.ends_with(".vcf.bgz")
    {
        Some(Format::Vcf)
    } else if name.ends_with(".bref4") {
        Some(Format::Bref4)
    } else {
        None
    }
}

/// Validated command-line parameters
#[derive(Clone, Debug)]
pub struct Config {
    /// Input filename, or `-` for stdin
    pub input: String,
    /// Output filename, or `-` for stdout
    pub output: String,
    /// Number of worker threads
    pub nthreads: usize,
    /// Coder level capacity growth, in bits
    pub bits_per_level: u32,
    /// Sparse-storage threshold; derived from the cohort size when absent
    pub max_nonmajor: Option<u32>,
    args: Vec<String>,
}

impl Config {
    /// Parse and validate `key=value` arguments.
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut map: HashMap<&str, &str> = HashMap::new();
        for arg in args {
            let (key, value) = arg.split_once('=').ok_or_else(|| {
                Bref4Error::arguments(format!(
                    "invalid argument \"{}\"; arguments have the form key=value",
                    arg
                ))
            })?;
            if map.insert(key, value).is_some() {
                return Err(Bref4Error::arguments(format!(
                    "duplicate \"{}=\" argument",
                    key
                )));
            }
        }

        let input = required(&map, "in")?;
        let output = required(&map, "out")?;
        for (name, value) in [("in", input), ("out", output)] {
            if format_of(value).is_none() || Path::new(value).is_dir() {
                return Err(Bref4Error::arguments(format!(
                    "invalid {}put file \"{}\"; the {}put file must be \"-\" or a filename \
                     ending in \".vcf\", \".vcf.gz\", \".vcf.bgz\", or \".bref4\"",
                    name, value, name
                )));
            }
        }
        if input != "-" && input == output {
            return Err(Bref4Error::arguments(format!(
                "input and output are the same file: \"{}\"",
                input
            )));
        }

        let nthreads = match map.get("nthreads") {
            Some(v) => parse_int(v, "nthreads", 1)?,
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        };
        let bits_per_level = match map.get("bits-per-level") {
            Some(v) => parse_int(v, "bits-per-level", 1)? as u32,
            None => 2,
        };
        let max_nonmajor = match map.get("max-nonmajor") {
            Some(v) => Some(parse_int(v, "max-nonmajor", 0)? as u32),
            None => None,
        };

        for key in map.keys() {
            if !matches!(*key, "in" | "out" | "nthreads" | "bits-per-level" | "max-nonmajor") {
                return Err(Bref4Error::arguments(format!(
                    "unrecognized argument \"{}=\"",
                    key
                )));
            }
        }

        Ok(Self {
            input: input.to_string(),
            output: output.to_string(),
            nthreads,
            bits_per_level,
            max_nonmajor,
            args: args.to_vec(),
        })
    }

    /// Format of the input file
    pub fn input_format(&self) -> Format {
        format_of(&self.input).unwrap_or(Format::Vcf)
    }

    /// Format of the output file
    pub fn output_format(&self) -> Format {
        format_of(&self.output).unwrap_or(Format::Vcf)
    }

    /// Encoding parameters for the bref4 writer
    pub fn encoding_params(&self) -> EncodingParams {
        EncodingParams {
            bits_per_level: self.bits_per_level,
            max_nonmajor: self.max_nonmajor,
        }
    }

    /// The command line and program version, as stamped into output files.
    pub fn command_line(&self) -> String {
        format!("bref4 {}  # bref4 (version {})", self.args.join(" "), VERSION)
    }

    /// Usage instructions printed on request or on argument errors.
    pub fn usage() -> String {
        format!(
            "bref4 version {VERSION}\n\
             \n\
             The bref4 program compresses and decompresses phased sequence data.\n\
             \n\
             Usage:\n\
             \x20 bref4 [parameters]\n\
             \n\
             Input and output file parameters:\n\
             \x20 in=[input file]                                        (required)\n\
             \x20 out=[output file]                                      (required)\n\
             \n\
             \x20 The filename suffix must indicate the file type:\n\
             \n\
             \x20   uncompressed VCF (\"*.vcf\")\n\
             \x20   gzip-compressed VCF (\"*.vcf.gz\" or \"*.vcf.bgz\")\n\
             \x20   bref4 (\"*.bref4\")\n\
             \n\
             \x20   Replace \"[input file]\" with \"-\" to read an uncompressed VCF file from stdin\n\
             \x20   Replace \"[output file]\" with \"-\" to write an uncompressed VCF file to stdout\n\
             \n\
             General parameters:\n\
             \x20 nthreads=<number of threads>                           (default: all CPU cores)\n\
             \x20 bits-per-level=<coder level growth in bits>            (default: 2)\n\
             \x20 max-nonmajor=<sparse storage threshold>                (default: derived from cohort size)\n"
        )
    }
}

fn required<'a>(map: &HashMap<&str, &'a str>, key: &str) -> Result<&'a str> {
    map.get(key).copied().ok_or_else(|| {
        Bref4Error::arguments(format!(
            "missing {}put file; the {}put file is specified with the \"{}=\" parameter",
            key, key, key
        ))
    })
}

fn parse_int(value: &str, key: &str, min: usize) -> Result<usize> {
    let parsed: usize = value.parse().map_err(|_| {
        Bref4Error::arguments(format!("invalid {} value \"{}\"", key, value))
    })?;
    if parsed < min {
        return Err(Bref4Error::arguments(format!(
            "{} must be at least {}",
            key, min
        )));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_minimal_arguments() {
        let config = Config::from_args(&args(&["in=a.vcf.gz", "out=b.bref4"])).unwrap();
        assert_eq!(config.input_format(), Format::Vcf);
        assert_eq!(config.output_format(), Format::Bref4);
        assert!(config.nthreads >= 1);
        assert_eq!(config.bits_per_level, 2);
        assert_eq!(config.max_nonmajor, None);
    }

    #[test]
    fn test_stdin_stdout() {
        let config = Config::from_args(&args(&["in=-", "out=-"])).unwrap();
        assert_eq!(config.input_format(), Format::Vcf);
        assert_eq!(config.output_format(), Format::Vcf);
    }

    #[test]
    fn test_missing_and_invalid_arguments() {
        assert!(Config::from_args(&args(&["in=a.vcf"])).is_err());
        assert!(Config::from_args(&args(&["in=a.txt", "out=b.bref4"])).is_err());
        assert!(Config::from_args(&args(&["in=a.vcf", "out=b.bref4", "bogus=1"])).is_err());
        assert!(Config::from_args(&args(&["in=a.vcf", "out=b.bref4", "nthreads=0"])).is_err());
    }

    #[test]
    fn test_in_equals_out_rejected() {
        assert!(Config::from_args(&args(&["in=a.bref4", "out=a.bref4"])).is_err());
        // two stdio streams are fine
        assert!(Config::from_args(&args(&["in=-", "out=-"])).is_ok());
    }

    #[test]
    fn test_command_line_stamp() {
        let config = Config::from_args(&args(&["in=a.vcf", "out=b.bref4"])).unwrap();
        let stamp = config.command_line();
        assert!(stamp.starts_with("bref4 in=a.vcf out=b.bref4"));
        assert!(stamp.contains(VERSION));
    }
}
