//! Configuration resolution.
//!
//! Builds a [`Configuration`] from, in order: command-line tokens, a
//! properties file, option defaults and finally interactive prompts for any
//! required option still missing. The command-line grammar is generated from
//! [`OPTION_REGISTRY`]; every raw value, whatever its source, goes through
//! the option's [`ParseStrategy`].

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::{debug, info, warn};

use crate::error::{ShellError, ShellResult};
use crate::options::{self, OptionDescriptor, OptionId, ParseStrategy, OPTION_REGISTRY};
use crate::transform::{self, TransformerRegistry};

/// Separator between `key=name` pairs in a bindings value.
const LIST_DELIMITER: char = ',';

/// A parsed option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// Text value.
    Text(String),
    /// Integer value.
    Integer(i64),
    /// Boolean value.
    Flag(bool),
    /// File path.
    Path(PathBuf),
    /// `key → transformer name` bindings.
    Bindings(BTreeMap<String, String>),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Text(s) => write!(f, "{}", s),
            OptionValue::Integer(i) => write!(f, "{}", i),
            OptionValue::Flag(b) => write!(f, "{}", b),
            OptionValue::Path(p) => write!(f, "{}", p.display()),
            OptionValue::Bindings(map) => {
                let pairs: Vec<String> = map.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "{}", pairs.join(","))
            }
        }
    }
}

/// Applies a parsing strategy to raw option text.
pub fn parse_value(descriptor: &OptionDescriptor, raw: &str) -> ShellResult<OptionValue> {
    let raw = raw.trim();
    match descriptor.strategy {
        ParseStrategy::Text => Ok(OptionValue::Text(raw.to_string())),
        ParseStrategy::Path => Ok(OptionValue::Path(PathBuf::from(raw))),
        ParseStrategy::Integer => raw.parse::<i64>().map(OptionValue::Integer).map_err(|_| {
            ShellError::argument(format!(
                "option '{}' expects an integer, got '{}'",
                descriptor.key, raw
            ))
        }),
        ParseStrategy::Flag => parse_flag(raw).map(OptionValue::Flag).ok_or_else(|| {
            ShellError::argument(format!(
                "option '{}' expects true or false, got '{}'",
                descriptor.key, raw
            ))
        }),
        ParseStrategy::Bindings => parse_bindings(descriptor, raw).map(OptionValue::Bindings),
    }
}

pub(crate) fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "" | "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn parse_bindings(descriptor: &OptionDescriptor, raw: &str) -> ShellResult<BTreeMap<String, String>> {
    let mut bindings = BTreeMap::new();
    for pair in raw.split(LIST_DELIMITER).map(str::trim).filter(|p| !p.is_empty()) {
        let (key, name) = pair.split_once('=').ok_or_else(|| {
            ShellError::argument(format!(
                "option '{}' expects KEY=NAME pairs, got '{}'",
                descriptor.key, pair
            ))
        })?;
        let (key, name) = (key.trim(), name.trim());
        if key.is_empty() || transform::instantiate(name).is_none() {
            return Err(ShellError::argument(format!(
                "option '{}': cannot bind '{}' to transformer '{}' (available: {})",
                descriptor.key,
                key,
                name,
                transform::BUILTIN_TRANSFORMERS.join(", ")
            )));
        }
        bindings.insert(key.to_uppercase(), name.to_ascii_lowercase());
    }
    Ok(bindings)
}

/// Resolved settings, keyed by option identity.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    values: BTreeMap<OptionId, OptionValue>,
}

impl Configuration {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of an option.
    pub fn get(&self, id: OptionId) -> Option<&OptionValue> {
        self.values.get(&id)
    }

    /// Sets the value of an option.
    pub fn set(&mut self, id: OptionId, value: OptionValue) {
        self.values.insert(id, value);
    }

    /// Returns true if the option holds a value.
    pub fn is_set(&self, id: OptionId) -> bool {
        self.values.contains_key(&id)
    }

    /// Iterates over set options in declaration order.
    pub fn entries(&self) -> impl Iterator<Item = (&'static OptionDescriptor, &OptionValue)> + '_ {
        OPTION_REGISTRY
            .iter()
            .filter_map(move |d| self.values.get(&d.id).map(|v| (d, v)))
    }

    /// Required options that hold no value, in declaration order.
    pub fn missing_required(&self) -> Vec<&'static OptionDescriptor> {
        OPTION_REGISTRY
            .iter()
            .filter(|d| d.required && !self.is_set(d.id))
            .collect()
    }

    fn text(&self, id: OptionId) -> Option<&str> {
        match self.get(id) {
            Some(OptionValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    fn flag(&self, id: OptionId) -> bool {
        matches!(self.get(id), Some(OptionValue::Flag(true)))
    }

    fn path(&self, id: OptionId) -> Option<&Path> {
        match self.get(id) {
            Some(OptionValue::Path(p)) => Some(p),
            _ => None,
        }
    }

    /// Connection URL.
    pub fn url(&self) -> &str {
        self.text(OptionId::Url).unwrap_or_default()
    }

    /// Database user.
    pub fn user(&self) -> &str {
        self.text(OptionId::User).unwrap_or_default()
    }

    /// Database password.
    pub fn password(&self) -> &str {
        self.text(OptionId::Password).unwrap_or_default()
    }

    /// Driver identifier, if any.
    pub fn driver(&self) -> Option<&str> {
        self.text(OptionId::Driver).filter(|d| !d.is_empty())
    }

    /// Transcript record identifier.
    pub fn record(&self) -> Option<&str> {
        self.text(OptionId::Record).filter(|r| !r.is_empty())
    }

    /// Result print limit; negative means unlimited.
    pub fn limit(&self) -> i64 {
        match self.get(OptionId::Limit) {
            Some(OptionValue::Integer(n)) => *n,
            _ => -1,
        }
    }

    /// Debug logging.
    pub fn debug(&self) -> bool {
        self.flag(OptionId::Debug)
    }

    /// Statement numbering in the prompt.
    pub fn line_numbers(&self) -> bool {
        self.flag(OptionId::LineNumbers)
    }

    /// Input file.
    pub fn file(&self) -> Option<&Path> {
        self.path(OptionId::File)
    }

    /// Transformer bindings.
    pub fn bindings(&self) -> BTreeMap<String, String> {
        match self.get(OptionId::Transform) {
            Some(OptionValue::Bindings(map)) => map.clone(),
            _ => BTreeMap::new(),
        }
    }

    /// Merges bindings; existing keys are kept. Returns the entries that
    /// were actually added.
    fn merge_bindings(&mut self, incoming: BTreeMap<String, String>) -> BTreeMap<String, String> {
        let slot = self
            .values
            .entry(OptionId::Transform)
            .or_insert_with(|| OptionValue::Bindings(BTreeMap::new()));
        let mut added = BTreeMap::new();
        if let OptionValue::Bindings(existing) = slot {
            for (key, name) in incoming {
                if !existing.contains_key(&key) {
                    existing.insert(key.clone(), name.clone());
                    added.insert(key, name);
                }
            }
        }
        added
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (descriptor, value) in self.entries() {
            if descriptor.sensitive {
                map.entry(&descriptor.key, &"****");
            } else {
                map.entry(&descriptor.key, value);
            }
        }
        map.finish()
    }
}

/// Source of interactive answers for missing required options.
pub trait Prompter {
    /// Asks for the value of one option.
    fn prompt(&mut self, descriptor: &OptionDescriptor) -> io::Result<String>;
}

/// Prompts on the terminal; sensitive options are read without echo.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn prompt(&mut self, descriptor: &OptionDescriptor) -> io::Result<String> {
        let label = format!("Enter {} ({}): ", descriptor.key, descriptor.help);
        if descriptor.sensitive {
            return rpassword::prompt_password(label);
        }

        let mut stderr = io::stderr();
        write!(stderr, "{}", label)?;
        stderr.flush()?;

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "end of input"));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// What the resolver decided the process should do.
#[derive(Debug)]
pub enum Resolution {
    /// Start the shell.
    Run(Configuration),
    /// Print usage and exit.
    Usage(String),
    /// Print the template properties file and exit.
    Template(String),
}

/// Turns tokens, properties and prompts into a [`Resolution`].
pub struct ConfigResolver<'a> {
    transformers: &'a mut TransformerRegistry,
    prompter: &'a mut dyn Prompter,
    default_properties: Option<PathBuf>,
}

impl<'a> ConfigResolver<'a> {
    /// Creates a resolver that registers bindings into `transformers` and
    /// asks `prompter` for missing values.
    pub fn new(transformers: &'a mut TransformerRegistry, prompter: &'a mut dyn Prompter) -> Self {
        Self {
            transformers,
            prompter,
            default_properties: None,
        }
    }

    /// Properties file read when none is named on the command line.
    pub fn with_default_properties(mut self, path: Option<PathBuf>) -> Self {
        self.default_properties = path;
        self
    }

    /// The per-user default properties file.
    pub fn user_properties_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("dbsh").join("dbsh.properties"))
    }

    /// Resolves command-line tokens (without the program name).
    pub fn resolve<I, S>(&mut self, args: I) -> ShellResult<Resolution>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = args.into_iter().map(|s| normalize_token(s.into())).collect();
        debug!(count = tokens.len(), "parsing command line");

        let matches = command()
            .try_get_matches_from(tokens)
            .map_err(|e| ShellError::argument(e.to_string().trim_end()))?;

        if admin_flag(&matches, OptionId::Help)? {
            return Ok(Resolution::Usage(usage()));
        }
        if admin_flag(&matches, OptionId::PrintTemplate)? {
            return Ok(Resolution::Template(template()));
        }

        let mut config = Configuration::new();
        self.apply_matches(&matches, &mut config)?;

        let properties = match matches.get_one::<String>(options::descriptor(OptionId::Properties).key) {
            Some(path) => Some(PathBuf::from(path)),
            None => self.default_properties.clone().filter(|p| p.exists()),
        };
        if let Some(path) = properties {
            self.load_properties(&path, &mut config)?;
        }

        self.apply_defaults(&mut config)?;
        self.prompt_missing(&mut config)?;
        debug!(?config, "configuration resolved");
        Ok(Resolution::Run(config))
    }

    fn apply_matches(&mut self, matches: &ArgMatches, config: &mut Configuration) -> ShellResult<()> {
        for descriptor in OPTION_REGISTRY.iter().filter(|d| !d.is_administrative()) {
            if descriptor.multivalued {
                for raw in matches.get_many::<String>(descriptor.key).into_iter().flatten() {
                    self.apply_raw(descriptor, raw, config, true)?;
                }
            } else if let Some(raw) = matches.get_one::<String>(descriptor.key) {
                self.apply_raw(descriptor, raw, config, true)?;
            }
        }
        Ok(())
    }

    /// Parses one raw value into `config`. Command-line values overwrite;
    /// properties values only fill what is unset.
    fn apply_raw(
        &mut self,
        descriptor: &OptionDescriptor,
        raw: &str,
        config: &mut Configuration,
        overwrite: bool,
    ) -> ShellResult<()> {
        match parse_value(descriptor, raw)? {
            OptionValue::Bindings(bindings) => {
                let added = if overwrite {
                    let mut current = config.bindings();
                    current.extend(bindings.clone());
                    config.set(descriptor.id, OptionValue::Bindings(current));
                    bindings
                } else {
                    config.merge_bindings(bindings)
                };
                for (key, name) in &added {
                    self.transformers.register_named(key, name)?;
                    debug!(key = %key, transformer = %name, "transformer registered");
                }
            }
            value => {
                if overwrite || !config.is_set(descriptor.id) {
                    config.set(descriptor.id, value);
                }
            }
        }
        Ok(())
    }

    /// Reads `key=value` lines from a properties file.
    pub fn load_properties(&mut self, path: &Path, config: &mut Configuration) -> ShellResult<()> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ShellError::argument(format!(
                "cannot read properties file {}: {}",
                path.display(),
                e
            ))
        })?;
        info!(path = %path.display(), "loading properties");

        for (line_no, key, value) in parse_properties(&text) {
            let Some(descriptor) = options::by_key(&key) else {
                warn!(path = %path.display(), line = line_no, key = %key, "ignoring unknown property");
                continue;
            };
            if descriptor.is_administrative() {
                warn!(line = line_no, key = %key, "ignoring administrative property");
                continue;
            }
            if value.is_empty() {
                continue;
            }
            self.apply_raw(descriptor, &value, config, false)
                .map_err(|e| ShellError::argument(format!("{}:{}: {}", path.display(), line_no, e)))?;
        }
        Ok(())
    }

    fn apply_defaults(&mut self, config: &mut Configuration) -> ShellResult<()> {
        for descriptor in OPTION_REGISTRY.iter().filter(|d| !d.is_administrative()) {
            if let (Some(default), false) = (descriptor.default, config.is_set(descriptor.id)) {
                config.set(descriptor.id, parse_value(descriptor, default)?);
            }
        }
        Ok(())
    }

    fn prompt_missing(&mut self, config: &mut Configuration) -> ShellResult<()> {
        for descriptor in config.missing_required() {
            let raw = self.prompter.prompt(descriptor).map_err(|e| {
                ShellError::argument(format!(
                    "no value for required option '{}': {}",
                    descriptor.key, e
                ))
            })?;
            config.set(descriptor.id, parse_value(descriptor, &raw)?);
        }
        Ok(())
    }
}

fn admin_flag(matches: &ArgMatches, id: OptionId) -> ShellResult<bool> {
    let descriptor = options::descriptor(id);
    match matches.get_one::<String>(descriptor.key) {
        Some(raw) => match parse_value(descriptor, raw)? {
            OptionValue::Flag(b) => Ok(b),
            _ => Ok(false),
        },
        None => Ok(false),
    }
}

/// Rewrites single-dash long aliases (`-help`) to their `--` form.
fn normalize_token(token: String) -> String {
    for descriptor in OPTION_REGISTRY {
        let is_single_dash_long = descriptor
            .aliases
            .iter()
            .any(|a| *a == token && !a.starts_with("--") && a.len() > 2);
        if is_single_dash_long {
            if let Some(long) = descriptor.long_name() {
                return format!("--{}", long);
            }
        }
    }
    token
}

/// Builds the command-line grammar from the registry.
fn command() -> Command {
    let mut cmd = Command::new("dbsh")
        .no_binary_name(true)
        .disable_help_flag(true)
        .disable_version_flag(true)
        .args_override_self(true);

    for descriptor in OPTION_REGISTRY {
        let mut arg = Arg::new(descriptor.key)
            .help(descriptor.help)
            .value_parser(clap::value_parser!(String));
        let (mut has_long, mut has_short) = (false, false);

        for &alias in descriptor.aliases {
            if let Some(long) = alias.strip_prefix("--") {
                arg = if has_long { arg.alias(long) } else { arg.long(long) };
                has_long = true;
            } else if let Some(short) = alias.strip_prefix('-') {
                let mut chars = short.chars();
                if let (Some(c), None) = (chars.next(), chars.next()) {
                    arg = if has_short { arg.short_alias(c) } else { arg.short(c) };
                    has_short = true;
                }
            }
        }

        arg = if descriptor.strategy.is_flag() {
            arg.num_args(0..=1)
                .default_missing_value("true")
                .action(ArgAction::Set)
        } else if descriptor.multivalued {
            arg.num_args(1).allow_hyphen_values(true).action(ArgAction::Append)
        } else {
            arg.num_args(1).allow_hyphen_values(true).action(ArgAction::Set)
        };
        cmd = cmd.arg(arg);
    }
    cmd
}

/// Splits properties text into `(line number, key, value)` entries.
fn parse_properties(text: &str) -> Vec<(usize, String, String)> {
    text.lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                return None;
            }
            let (key, value) = match line.find(&['=', ':'][..]) {
                Some(pos) => (&line[..pos], &line[pos + 1..]),
                None => (line, ""),
            };
            Some((index + 1, key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Usage text generated from the registry.
pub fn usage() -> String {
    let rows: Vec<(String, &OptionDescriptor)> = OPTION_REGISTRY
        .iter()
        .map(|d| (format!("{} {}", d.alias_list(), d.strategy.placeholder()), d))
        .collect();
    let width = rows.iter().map(|(left, _)| left.len()).max().unwrap_or(0);

    let mut out = String::from("Usage: dbsh [OPTIONS]\n\nOptions:\n");
    for (left, d) in rows {
        let mut markers = Vec::new();
        if d.required {
            markers.push("required");
        }
        if d.multivalued {
            markers.push("repeatable");
        }
        if d.sensitive {
            markers.push("masked");
        }
        let markers = if markers.is_empty() {
            String::new()
        } else {
            format!(" [{}]", markers.join(", "))
        };
        out.push_str(&format!("  {:<width$}  {}{}\n", left, d.help, markers, width = width));
    }
    out.push_str(
        "\nStatements end with ';'. Prefix a statement with '!' to evaluate an expression \
         against the session; type 'help' in the shell to list expression operations.\n",
    );
    out
}

/// Template properties file: one commented block per option.
pub fn template() -> String {
    let mut out = String::from(
        "# dbsh properties\n\
         # Use with: dbsh --properties <file>. Blank values are treated as unset.\n",
    );
    for d in OPTION_REGISTRY.iter().filter(|d| !d.is_administrative()) {
        let level = if d.required { "required" } else { "optional" };
        let kind = if d.multivalued { ", multivalued" } else { "" };
        let value = match (d.strategy, d.sensitive, d.default) {
            (ParseStrategy::Bindings, _, _) | (_, true, _) | (_, _, None) => "",
            (_, false, Some(default)) => default,
        };
        out.push_str(&format!("\n# {} ({}{})\n# {}\n{}={}\n", d.key, level, kind, d.help, d.key, value));
    }
    out
}
