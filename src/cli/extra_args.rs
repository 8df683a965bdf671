//! Capture of unknown `--key value` / `--key=value` arguments.
//!
//! clap rejects flags it does not know, so the raw argument list is
//! partitioned before parsing: tokens naming a declared flag (and the value
//! that follows a value-taking flag) go to clap, unknown long flags become
//! free-form job fields.

use std::collections::{BTreeMap, HashMap};

use crate::error::SubmitError;
use crate::submission::split_pair;

/// Declared flags of a clap command and whether each takes a value.
#[derive(Debug, Default)]
pub struct KnownFlags {
    longs: HashMap<String, bool>,
    shorts: HashMap<char, bool>,
}

impl KnownFlags {
    pub fn from_command(command: &clap::Command) -> Self {
        let mut command = command.clone();
        command.build();

        let mut known = Self::default();
        for arg in command.get_arguments() {
            let takes_value = arg.get_action().takes_values();
            if let Some(long) = arg.get_long() {
                known.longs.insert(long.to_string(), takes_value);
            }
            if let Some(short) = arg.get_short() {
                known.shorts.insert(short, takes_value);
            }
        }
        known.longs.entry("help".to_string()).or_insert(false);
        known.shorts.entry('h').or_insert(false);
        known
    }
}

/// Result of splitting the raw argument list.
#[derive(Debug, Default, PartialEq)]
pub struct PartitionedArgs {
    /// Arguments to hand to clap, program name first.
    pub known: Vec<String>,
    /// Unknown flags as key/value pairs. A repeated key keeps the last value.
    pub extra: BTreeMap<String, String>,
}

/// Splits `args` (program name first) into clap arguments and extra fields.
///
/// Accepted extra forms are `--key value`, where `value` does not start with
/// `-`, and `--key=value`. Any other unknown long flag is an error.
pub fn partition_args<I, T>(args: I, known: &KnownFlags) -> Result<PartitionedArgs, SubmitError>
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    let mut tokens = args.into_iter().map(Into::into).peekable();
    let mut out = PartitionedArgs::default();

    if let Some(program) = tokens.next() {
        out.known.push(program);
    }

    while let Some(token) = tokens.next() {
        if token == "--" {
            out.known.push(token);
            out.known.extend(tokens.by_ref());
            break;
        }

        if let Some(body) = token.strip_prefix("--") {
            let name = body.split('=').next().unwrap_or_default();
            match known.longs.get(name) {
                Some(&takes_value) => {
                    let inline = body.contains('=');
                    out.known.push(token);
                    if takes_value && !inline {
                        out.known.extend(tokens.next());
                    }
                }
                None if body.contains('=') => {
                    let (key, value) = split_pair(&token, body, '=')?;
                    out.extra.insert(key, value);
                }
                None => match tokens.next_if(|next| !next.starts_with('-')) {
                    Some(value) => {
                        out.extra.insert(body.to_string(), value);
                    }
                    // No value follows: only the `key=value` shape is left.
                    None => {
                        let (key, value) = split_pair(&token, body, '=')?;
                        out.extra.insert(key, value);
                    }
                },
            }
            continue;
        }

        let short_takes_value = {
            let mut chars = token.chars();
            match (chars.next(), chars.next(), chars.next()) {
                (Some('-'), Some(short), None) => known.shorts.get(&short).copied().unwrap_or(false),
                _ => false,
            }
        };
        out.known.push(token);
        if short_takes_value {
            out.known.extend(tokens.next());
        }
    }

    Ok(out)
}
