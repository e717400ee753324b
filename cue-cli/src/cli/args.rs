//! CLI argument definitions for `cue`.

use clap::{value_parser, Arg, ArgAction, Command};

/// Build the CLI argument parser and command definitions.
pub fn build_cli() -> Command {
    Command::new("cue")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Play, mix and render short sounds")
        .arg_required_else_help(true)
        .subcommand_required(true)
        .arg(
            Arg::new("settings")
                .long("settings")
                .value_name("PATH")
                .global(true)
                .help("Path to a JSON settings file"),
        )
        .subcommand(
            Command::new("play")
                .about("Play one or more files at once on the default output")
                .arg(
                    Arg::new("INPUT")
                        .help("Audio files to play together")
                        .required(true)
                        .num_args(1..)
                        .index(1),
                )
                .arg(
                    Arg::new("loop")
                        .long("loop")
                        .short('l')
                        .action(ArgAction::SetTrue)
                        .help("Loop every file until interrupted"),
                )
                .arg(
                    Arg::new("GAIN")
                        .long("gain")
                        .short('g')
                        .value_name("GAIN")
                        .default_value("1.0")
                        .value_parser(value_parser!(f32))
                        .help("Linear gain applied to each file"),
                ),
        )
        .subcommand(Command::new("tone").about("Play the test tone on the default output"))
        .subcommand(
            Command::new("render")
                .about("Mix files and/or the test tone offline into a WAV file")
                .arg(
                    Arg::new("INPUT")
                        .help("Audio files to mix")
                        .num_args(0..)
                        .index(1),
                )
                .arg(
                    Arg::new("test-tone")
                        .long("test-tone")
                        .action(ArgAction::SetTrue)
                        .help("Add the test tone to the mix"),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .short('o')
                        .value_name("PATH")
                        .required(true)
                        .help("Output WAV path"),
                )
                .arg(
                    Arg::new("seconds")
                        .long("seconds")
                        .value_name("SECONDS")
                        .value_parser(value_parser!(f64))
                        .help("Length to render; defaults to the longest input"),
                ),
        )
        .subcommand(
            Command::new("info")
                .about("Print the format of a decodable file")
                .arg(
                    Arg::new("INPUT")
                        .help("The input file path")
                        .required(true)
                        .index(1),
                ),
        )
}
