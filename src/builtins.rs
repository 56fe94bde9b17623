/// Built-in functions implemented by the interpreter. Their names are
/// reserved: the checker seeds these signatures into the global frame before
/// any declaration is visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Print,
    Read,
    Stoi,
    Stod,
    Itos,
    Dtos,
    Length,
    Get,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Read => "read",
            Self::Stoi => "stoi",
            Self::Stod => "stod",
            Self::Itos => "itos",
            Self::Dtos => "dtos",
            Self::Length => "length",
            Self::Get => "get",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "print" => Some(Self::Print),
            "read" => Some(Self::Read),
            "stoi" => Some(Self::Stoi),
            "stod" => Some(Self::Stod),
            "itos" => Some(Self::Itos),
            "dtos" => Some(Self::Dtos),
            "length" => Some(Self::Length),
            "get" => Some(Self::Get),
            _ => None,
        }
    }

    /// Signature as parameter type names followed by the return type name,
    /// the same layout the checker stores for user functions.
    pub fn signature(self) -> &'static [&'static str] {
        match self {
            Self::Print => &["string", "nil"],
            Self::Read => &["string"],
            Self::Stoi => &["string", "int"],
            Self::Stod => &["string", "double"],
            Self::Itos => &["int", "string"],
            Self::Dtos => &["double", "string"],
            Self::Length => &["string", "int"],
            Self::Get => &["int", "string", "char"],
        }
    }

    pub fn all() -> &'static [Builtin] {
        &[
            Self::Print,
            Self::Read,
            Self::Stoi,
            Self::Stod,
            Self::Itos,
            Self::Dtos,
            Self::Length,
            Self::Get,
        ]
    }
}
