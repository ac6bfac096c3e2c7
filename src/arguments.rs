//! Splits a raw `docker-compose` command line into global flags, the
//! subcommand and its arguments.
//!
//! Only `--file`/`-f` and `--project-name`/`-p` are understood among the
//! global flags. Every other flag is kept as a single opaque token, so an
//! unknown flag that expects a value (`--log-level DEBUG`) leaves its value to
//! be read as the subcommand. Non-build commands are forwarded untouched, so
//! this only matters on the build path.

use std::ffi::{OsStr, OsString};

pub const BUILD_SUBCOMMAND: &str = "build";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComposeArgs {
    pub project_name: Option<String>,
    pub compose_files: Vec<String>,
    pub global_args: Vec<String>,
    pub subcommand: Option<String>,
    pub subcommand_args: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Translate into an image builder invocation.
    Build(ComposeArgs),
    /// Hand the arguments (program name excluded) to the orchestrator as they are.
    Passthrough(Vec<OsString>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Globals,
    Subcommand,
    SubcommandArgs,
}

struct Cursor<'a, S> {
    tokens: &'a [S],
    index: usize,
}

impl<'a, S: AsRef<str>> Cursor<'a, S> {
    fn peek(&self) -> Option<&'a str> {
        let tokens: &'a [S] = self.tokens;
        tokens.get(self.index).map(|token| token.as_ref())
    }

    fn next(&mut self) -> Option<&'a str> {
        let token = self.peek()?;
        self.index += 1;
        Some(token)
    }

    fn rest(&mut self) -> impl Iterator<Item = &'a str> {
        let tokens: &'a [S] = self.tokens;
        let start = self.index.min(tokens.len());
        self.index = tokens.len();
        tokens[start..].iter().map(|token| token.as_ref())
    }

    /// Consumes `--long value`, `-short value`, `--long=value` or
    /// `-short=value`. Leaves the cursor alone when the current token is none
    /// of those, or when a separate value token is missing.
    fn flag_value(&mut self, long: &str, short: &str) -> Option<String> {
        let token = self.peek()?;
        let long = format!("--{}", long);
        let short = format!("-{}", short);

        if token == long || token == short {
            let tokens: &'a [S] = self.tokens;
            let value = tokens.get(self.index + 1)?.as_ref();
            self.index += 2;
            return Some(value.to_owned());
        }

        for flag in &[long, short] {
            if let Some(value) = token
                .strip_prefix(flag.as_str())
                .and_then(|rest| rest.strip_prefix('='))
            {
                self.index += 1;
                return Some(value.to_owned());
            }
        }

        None
    }
}

pub fn parse_arguments<S: AsRef<str>>(argv: &[S]) -> ComposeArgs {
    let mut cursor = Cursor {
        tokens: argv,
        index: 1,
    };
    let mut result = ComposeArgs::default();
    let mut state = State::Globals;

    loop {
        match state {
            State::Globals => match cursor.peek() {
                Some(token) if token.starts_with('-') => {
                    if let Some(file) = cursor.flag_value("file", "f") {
                        result.compose_files.push(file);
                    } else if let Some(name) = cursor.flag_value("project-name", "p") {
                        result.project_name = Some(name);
                    } else {
                        result.global_args.push(token.to_owned());
                        cursor.next();
                    }
                }
                Some(_) => state = State::Subcommand,
                None => break,
            },
            State::Subcommand => {
                result.subcommand = cursor.next().map(str::to_owned);
                state = State::SubcommandArgs;
            }
            State::SubcommandArgs => {
                result.subcommand_args.extend(cursor.rest().map(str::to_owned));
                break;
            }
        }
    }

    result
}

/// Arguments that are not valid unicode are routed on a lossy copy; the
/// passthrough keeps the original bytes.
pub fn route<S: AsRef<OsStr>>(argv: &[S]) -> RoutingDecision {
    let tokens: Vec<String> = argv
        .iter()
        .map(|token| token.as_ref().to_string_lossy().into_owned())
        .collect();
    let args = parse_arguments(&tokens);

    if args.subcommand.as_deref() == Some(BUILD_SUBCOMMAND) {
        RoutingDecision::Build(args)
    } else {
        let original = argv
            .iter()
            .skip(1)
            .map(|token| token.as_ref().to_os_string())
            .collect();
        RoutingDecision::Passthrough(original)
    }
}
