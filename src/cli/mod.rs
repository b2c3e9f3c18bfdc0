//! Command-line surfaces of the three binaries.

pub mod patch;
pub mod subject;

use std::collections::HashMap;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use clap::{Arg, Command, CommandFactory, Parser};
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

pub use patch::{PatchTestArgs, PatchTrainArgs};
pub use subject::SubjectArgs;

/// Installs the global `fmt` subscriber; `RUST_LOG` overrides the `info`
/// default. A second call is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arity {
    Flag,
    One,
    Many,
}

fn arity(arg: &Arg) -> Arity {
    if !arg.get_action().takes_values() {
        return Arity::Flag;
    }
    match arg.get_num_args() {
        Some(range) if range.max_values() > 1 => Arity::Many,
        _ => Arity::One,
    }
}

fn is_option(token: &str) -> bool {
    token.len() > 1 && token.starts_with('-') && token.parse::<f64>().is_err()
}

struct ShortCluster {
    kept: String,
    dropped: String,
    arity: Arity,
    inline: bool,
}

/// Splits `-abc` into the letters `cmd` knows and the rest. A known letter
/// taking a value ends the cluster and owns whatever follows it.
fn split_short_cluster(body: &str, shorts: &HashMap<char, Arity>) -> ShortCluster {
    let mut kept = String::new();
    let mut dropped = String::new();
    for (pos, c) in body.char_indices() {
        match shorts.get(&c) {
            Some(Arity::Flag) => kept.push(c),
            Some(&arity) => {
                let value = &body[pos + c.len_utf8()..];
                kept.push(c);
                kept.push_str(value);
                return ShortCluster { kept, dropped, arity, inline: !value.is_empty() };
            }
            None => dropped.push(c),
        }
    }
    ShortCluster { kept, dropped, arity: Arity::Flag, inline: false }
}

/// Separates the arguments `cmd` understands from the rest.
///
/// `args` starts with the program name. An unknown option swallows the
/// token after it when that token cannot be a positional any more.
pub fn split_known_args<I>(cmd: &Command, args: I) -> (Vec<String>, Vec<String>)
where
    I: IntoIterator<Item = String>,
{
    let mut longs: HashMap<String, Arity> = HashMap::new();
    let mut shorts: HashMap<char, Arity> = HashMap::new();
    let mut positionals = 0;
    for arg in cmd.get_arguments() {
        if arg.is_positional() {
            positionals += 1;
            continue;
        }
        let a = arity(arg);
        if let Some(long) = arg.get_long() {
            longs.insert(long.to_string(), a);
        }
        for alias in arg.get_all_aliases().unwrap_or_default() {
            longs.insert(alias.to_string(), a);
        }
        if let Some(short) = arg.get_short() {
            shorts.insert(short, a);
        }
        for alias in arg.get_all_short_aliases().unwrap_or_default() {
            shorts.insert(alias, a);
        }
    }
    longs.entry("help".into()).or_insert(Arity::Flag);
    shorts.entry('h').or_insert(Arity::Flag);
    if cmd.get_version().is_some() {
        longs.entry("version".into()).or_insert(Arity::Flag);
        shorts.entry('V').or_insert(Arity::Flag);
    }

    let tokens: Vec<String> = args.into_iter().collect();
    let mut known = Vec::with_capacity(tokens.len());
    let mut unknown = Vec::new();
    let mut positional_seen = 0;
    let mut i = 0;
    if let Some(program) = tokens.first() {
        known.push(program.clone());
        i = 1;
    }

    while i < tokens.len() {
        let token = &tokens[i];
        if token == "--" {
            known.extend(tokens[i..].iter().cloned());
            break;
        }
        if !is_option(token) {
            known.push(token.clone());
            positional_seen += 1;
            i += 1;
            continue;
        }

        // (token kept, arity, value already attached)
        let lookup = if let Some(long) = token.strip_prefix("--") {
            let (name, inline) = match long.split_once('=') {
                Some((name, _)) => (name, true),
                None => (long, false),
            };
            longs.get(name).map(|&a| (token.clone(), a, inline))
        } else {
            let cluster = split_short_cluster(&token[1..], &shorts);
            if cluster.kept.is_empty() {
                None
            } else {
                if !cluster.dropped.is_empty() {
                    unknown.push(format!("-{}", cluster.dropped));
                }
                Some((format!("-{}", cluster.kept), cluster.arity, cluster.inline))
            }
        };

        match lookup {
            Some((kept, a, inline)) => {
                known.push(kept);
                i += 1;
                if inline {
                    continue;
                }
                match a {
                    Arity::Flag => {}
                    Arity::One => {
                        if let Some(value) = tokens.get(i) {
                            known.push(value.clone());
                            i += 1;
                        }
                    }
                    Arity::Many => {
                        while let Some(value) = tokens.get(i) {
                            if is_option(value) || value == "--" {
                                break;
                            }
                            known.push(value.clone());
                            i += 1;
                        }
                    }
                }
            }
            None => {
                unknown.push(token.clone());
                i += 1;
                let attached = token.starts_with("--") && token.contains('=');
                if !attached && positional_seen >= positionals {
                    if let Some(value) = tokens.get(i).filter(|v| !is_option(v) && *v != "--") {
                        unknown.push(value.clone());
                        i += 1;
                    }
                }
            }
        }
    }
    (known, unknown)
}

/// What to do with arguments the parser does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownArgs {
    Warn,
    Fail,
}

/// Parses `argv` into `T` after setting aside unknown arguments according
/// to `policy`. Help, version and malformed known arguments exit the
/// process through clap.
pub fn parse_args<T, I>(argv: I, policy: UnknownArgs) -> Result<T>
where
    T: Parser + CommandFactory,
    I: IntoIterator<Item = String>,
{
    let (known, unknown) = split_known_args(&T::command(), argv);
    if !unknown.is_empty() {
        match policy {
            UnknownArgs::Warn => warn!("ignoring unknown arguments: {:?}", unknown),
            UnknownArgs::Fail => return Err(Error::UnknownArguments(unknown)),
        }
    }
    Ok(T::try_parse_from(known).unwrap_or_else(|e| e.exit()))
}

/// Dumps the parsed options to `<output_dir>/commandline_<kind>.json`.
pub fn write_commandline<T: Serialize>(output_dir: &Path, kind: &str, options: &T) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!("commandline_{}.json", kind));
    let writer = BufWriter::new(fs::File::create(&path)?);
    serde_json::to_writer_pretty(writer, options)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Parser, Debug)]
    #[command(name = "demo", version, allow_negative_numbers = true)]
    struct Demo {
        input: String,
        output: String,
        #[arg(long = "batch_size", default_value_t = 2)]
        batch_size: usize,
        #[arg(short = 'd', long = "diagnoses", num_args = 1.., default_values_t = ["AD".to_string(), "CN".to_string()])]
        diagnoses: Vec<String>,
        #[arg(short = 'n', long = "minmaxnormalization")]
        normalize: bool,
        #[arg(long)]
        gpu: bool,
        #[arg(long)]
        tolerance: Option<f64>,
    }

    fn argv(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn known_arguments_pass_through_untouched() {
        let args = argv("demo in out --batch_size 4 -d sMCI pMCI -n --gpu");
        let (known, unknown) = split_known_args(&Demo::command(), args.clone());
        assert_eq!(known, args);
        assert!(unknown.is_empty());

        let demo = Demo::try_parse_from(known).unwrap();
        assert_eq!(demo.diagnoses, vec!["sMCI", "pMCI"]);
        assert!(demo.normalize && demo.gpu);
    }

    #[test]
    fn unknown_options_are_set_aside_with_their_values() {
        let (known, unknown) =
            split_known_args(&Demo::command(), argv("demo in out --dropout 0.5 --batch_size=8 --verbose -x"));
        assert_eq!(known, argv("demo in out --batch_size=8"));
        assert_eq!(unknown, argv("--dropout 0.5 --verbose -x"));
    }

    #[test]
    fn unknown_flag_before_positionals_does_not_eat_them() {
        let (known, unknown) = split_known_args(&Demo::command(), argv("demo --verbose in out"));
        assert_eq!(known, argv("demo in out"));
        assert_eq!(unknown, argv("--verbose"));
    }

    #[test]
    fn negative_numbers_are_values() {
        let (known, unknown) = split_known_args(&Demo::command(), argv("demo in out --tolerance -0.5"));
        assert!(unknown.is_empty());
        assert_eq!(Demo::try_parse_from(known).unwrap().tolerance, Some(-0.5));
    }

    #[test]
    fn known_letters_survive_a_cluster_with_unknown_ones() {
        let (known, unknown) = split_known_args(&Demo::command(), argv("demo in out -nx"));
        assert_eq!(known, argv("demo in out -n"));
        assert_eq!(unknown, argv("-x"));
        assert!(Demo::try_parse_from(known).unwrap().normalize);

        let (known, unknown) = split_known_args(&Demo::command(), argv("demo in out -xnd sMCI pMCI"));
        assert_eq!(known, argv("demo in out -nd sMCI pMCI"));
        assert_eq!(unknown, argv("-x"));
        let demo = Demo::try_parse_from(known).unwrap();
        assert!(demo.normalize);
        assert_eq!(demo.diagnoses, vec!["sMCI", "pMCI"]);
    }

    #[test]
    fn fail_policy_reports_every_unknown_token() {
        let err = parse_args::<Demo, _>(argv("demo in out --foo bar"), UnknownArgs::Fail).unwrap_err();
        match err {
            Error::UnknownArguments(args) => assert_eq!(args, argv("--foo bar")),
            other => panic!("unexpected error {}", other),
        }
        let demo = parse_args::<Demo, _>(argv("demo in out --foo bar"), UnknownArgs::Warn).unwrap();
        assert_eq!(demo.output, "out");
    }

    #[test]
    fn commandline_is_dumped_as_json() {
        #[derive(Serialize)]
        struct Options {
            epochs: usize,
        }
        let dir = tempfile::tempdir().unwrap();
        let path = write_commandline(dir.path(), "CNN", &Options { epochs: 3 }).unwrap();
        assert_eq!(path.file_name().unwrap(), "commandline_CNN.json");
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["epochs"], 3);
    }
}
