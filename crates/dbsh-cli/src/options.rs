//! The option registry.
//!
//! Every setting the shell understands is declared once in
//! [`OPTION_REGISTRY`]. The resolver, the usage text, the template properties
//! file and the command-line parser are all generated from this table.
//! Declaration order is significant: missing required options are prompted
//! for in this order.

use std::fmt;

/// Identity of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OptionId {
    /// Connection URL.
    Url,
    /// Database user.
    User,
    /// Database password.
    Password,
    /// Driver identifier.
    Driver,
    /// Transformer bindings.
    Transform,
    /// Result print limit.
    Limit,
    /// Transcript record identifier.
    Record,
    /// Debug logging.
    Debug,
    /// Statement numbering in the prompt.
    LineNumbers,
    /// Input file.
    File,
    /// Properties file.
    Properties,
    /// Print usage and exit.
    Help,
    /// Print the template properties file and exit.
    PrintTemplate,
}

/// How raw option text is turned into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// Kept as text.
    Text,
    /// Signed integer.
    Integer,
    /// Boolean; present without a value means `true`.
    Flag,
    /// File system path.
    Path,
    /// `key=transformer` pairs separated by `,`, accumulated into a map.
    Bindings,
}

impl ParseStrategy {
    /// Returns true if the option takes no value on the command line.
    pub fn is_flag(self) -> bool {
        matches!(self, ParseStrategy::Flag)
    }

    /// Placeholder shown in the usage text.
    pub fn placeholder(self) -> &'static str {
        match self {
            ParseStrategy::Text => "<VALUE>",
            ParseStrategy::Integer => "<N>",
            ParseStrategy::Flag => "[true|false]",
            ParseStrategy::Path => "<FILE>",
            ParseStrategy::Bindings => "<KEY=NAME,...>",
        }
    }
}

/// Declaration of one option.
#[derive(Debug, Clone, Copy)]
pub struct OptionDescriptor {
    /// Identity.
    pub id: OptionId,
    /// Field name used in properties files.
    pub key: &'static str,
    /// Accepted command-line spellings, canonical long form first among the
    /// `--` aliases.
    pub aliases: &'static [&'static str],
    /// One-line help.
    pub help: &'static str,
    /// Must hold a value before the shell starts.
    pub required: bool,
    /// Masked when prompted, never echoed or listed.
    pub sensitive: bool,
    /// May be given more than once; values accumulate.
    pub multivalued: bool,
    /// Parsing strategy.
    pub strategy: ParseStrategy,
    /// Value applied when nothing else sets the option.
    pub default: Option<&'static str>,
}

impl OptionDescriptor {
    /// Administrative options steer the resolver itself and never reach the
    /// configuration or the template.
    pub fn is_administrative(&self) -> bool {
        matches!(
            self.id,
            OptionId::Properties | OptionId::Help | OptionId::PrintTemplate
        )
    }

    /// The canonical `--long` name without dashes.
    pub fn long_name(&self) -> Option<&'static str> {
        self.aliases.iter().find_map(|a| a.strip_prefix("--"))
    }

    /// Human-readable alias list, e.g. `-c, --url`.
    pub fn alias_list(&self) -> String {
        self.aliases.join(", ")
    }
}

impl fmt::Display for OptionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// Every option, in declaration order.
pub static OPTION_REGISTRY: &[OptionDescriptor] = &[
    OptionDescriptor {
        id: OptionId::Url,
        key: "url",
        aliases: &["-c", "--url"],
        help: "Connection string, e.g. sqlite:/tmp/app.db or sqlite::memory:",
        required: true,
        sensitive: false,
        multivalued: false,
        strategy: ParseStrategy::Text,
        default: None,
    },
    OptionDescriptor {
        id: OptionId::User,
        key: "user",
        aliases: &["-u", "--user"],
        help: "Database user name",
        required: true,
        sensitive: false,
        multivalued: false,
        strategy: ParseStrategy::Text,
        default: None,
    },
    OptionDescriptor {
        id: OptionId::Password,
        key: "password",
        aliases: &["-p", "--password"],
        help: "Database password",
        required: true,
        sensitive: true,
        multivalued: false,
        strategy: ParseStrategy::Text,
        default: None,
    },
    OptionDescriptor {
        id: OptionId::Driver,
        key: "driver",
        aliases: &["-d", "--driver"],
        help: "Driver identifier",
        required: false,
        sensitive: false,
        multivalued: false,
        strategy: ParseStrategy::Text,
        default: Some("sqlite"),
    },
    OptionDescriptor {
        id: OptionId::Transform,
        key: "transform",
        aliases: &["-t", "--transform"],
        help: "Value transformers by column or type name, e.g. PAYLOAD=hex,CLOB=text",
        required: false,
        sensitive: false,
        multivalued: true,
        strategy: ParseStrategy::Bindings,
        default: None,
    },
    OptionDescriptor {
        id: OptionId::Limit,
        key: "limit",
        aliases: &["-l", "--limit"],
        help: "Maximum rows printed per result, -1 for all",
        required: false,
        sensitive: false,
        multivalued: false,
        strategy: ParseStrategy::Integer,
        default: Some("-1"),
    },
    OptionDescriptor {
        id: OptionId::Record,
        key: "record",
        aliases: &["-r", "--record"],
        help: "Record the session to an HTML transcript with this identifier",
        required: false,
        sensitive: false,
        multivalued: false,
        strategy: ParseStrategy::Text,
        default: None,
    },
    OptionDescriptor {
        id: OptionId::Debug,
        key: "debug",
        aliases: &["-x", "--debug"],
        help: "Enable debug logging",
        required: false,
        sensitive: false,
        multivalued: false,
        strategy: ParseStrategy::Flag,
        default: Some("false"),
    },
    OptionDescriptor {
        id: OptionId::LineNumbers,
        key: "line_numbers",
        aliases: &["-n", "--line-numbers"],
        help: "Number statements in the prompt",
        required: false,
        sensitive: false,
        multivalued: false,
        strategy: ParseStrategy::Flag,
        default: Some("false"),
    },
    OptionDescriptor {
        id: OptionId::File,
        key: "file",
        aliases: &["-f", "--file"],
        help: "Read statements from this file instead of the terminal",
        required: false,
        sensitive: false,
        multivalued: false,
        strategy: ParseStrategy::Path,
        default: None,
    },
    OptionDescriptor {
        id: OptionId::Properties,
        key: "properties",
        aliases: &["-P", "--properties"],
        help: "Read options from this properties file",
        required: false,
        sensitive: false,
        multivalued: false,
        strategy: ParseStrategy::Path,
        default: None,
    },
    OptionDescriptor {
        id: OptionId::Help,
        key: "help",
        aliases: &["-h", "-help", "--help"],
        help: "Print this help and exit",
        required: false,
        sensitive: false,
        multivalued: false,
        strategy: ParseStrategy::Flag,
        default: None,
    },
    OptionDescriptor {
        id: OptionId::PrintTemplate,
        key: "print_template",
        aliases: &["-T", "--print-template"],
        help: "Print a template properties file and exit",
        required: false,
        sensitive: false,
        multivalued: false,
        strategy: ParseStrategy::Flag,
        default: None,
    },
];

/// Looks up a descriptor by identity.
pub fn descriptor(id: OptionId) -> &'static OptionDescriptor {
    OPTION_REGISTRY
        .iter()
        .find(|d| d.id == id)
        .unwrap_or_else(|| unreachable!("option {:?} is not registered", id))
}

/// Looks up a descriptor by properties-file key (case-insensitive, `-` and
/// `_` interchangeable).
pub fn by_key(key: &str) -> Option<&'static OptionDescriptor> {
    let key = key.trim().replace('-', "_");
    OPTION_REGISTRY
        .iter()
        .find(|d| d.key.eq_ignore_ascii_case(&key))
}
