//! Source locations attached to nodes.

use serde::{Deserialize, Deserializer, Serialize};

/// A byte range in one of the program's source files.
///
/// Written flat (`{"begin":0,"end":4,"file":1}`). The parser's nested
/// form (`{"pos":{"begin":0,"end":4},"file":1}`) is accepted on input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Loc {
    pub begin: u64,
    pub end: u64,
    pub file: u64,
}

impl Loc {
    pub fn new(begin: u64, end: u64, file: u64) -> Self {
        Self { begin, end, file }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.begin)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Deserialize)]
struct Pos {
    begin: u64,
    end: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LocRepr {
    Flat {
        begin: u64,
        end: u64,
        #[serde(default)]
        file: u64,
    },
    Nested {
        pos: Pos,
        #[serde(default)]
        file: u64,
    },
}

impl<'de> Deserialize<'de> for Loc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match LocRepr::deserialize(deserializer)? {
            LocRepr::Flat { begin, end, file } => Loc { begin, end, file },
            LocRepr::Nested { pos, file } => Loc {
                begin: pos.begin,
                end: pos.end,
                file,
            },
        })
    }
}
