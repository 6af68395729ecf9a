use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One cell of a dependency grid.
///
/// Rows are sources and columns are targets: `<` in row A, column B means A
/// depends on B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "char", into = "char")]
pub enum DependencyChar {
    /// `x`: each side depends on the other.
    Mutual,
    /// `<`: the row depends on the column.
    RowDependsOnColumn,
    /// `>`: the column depends on the row.
    ColumnDependsOnRow,
    /// `n`: verified, no dependency.
    NoDependency,
    /// `d`: documentation link.
    Documentation,
    /// `S`: strong semantic similarity.
    StrongSemantic,
    /// `s`: weak semantic similarity.
    WeakSemantic,
    /// `p`: not yet analysed.
    Placeholder,
    /// `o`: the diagonal.
    Diagonal,
    /// `.`: nothing recorded.
    Unset,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("'{0}' is not a dependency character")]
pub struct InvalidDependencyChar(pub char);

impl DependencyChar {
    pub const ALL: [DependencyChar; 10] = [
        DependencyChar::Mutual,
        DependencyChar::RowDependsOnColumn,
        DependencyChar::ColumnDependsOnRow,
        DependencyChar::NoDependency,
        DependencyChar::Documentation,
        DependencyChar::StrongSemantic,
        DependencyChar::WeakSemantic,
        DependencyChar::Placeholder,
        DependencyChar::Diagonal,
        DependencyChar::Unset,
    ];

    pub fn as_char(self) -> char {
        match self {
            DependencyChar::Mutual => 'x',
            DependencyChar::RowDependsOnColumn => '<',
            DependencyChar::ColumnDependsOnRow => '>',
            DependencyChar::NoDependency => 'n',
            DependencyChar::Documentation => 'd',
            DependencyChar::StrongSemantic => 'S',
            DependencyChar::WeakSemantic => 's',
            DependencyChar::Placeholder => 'p',
            DependencyChar::Diagonal => 'o',
            DependencyChar::Unset => '.',
        }
    }

    /// Merge priority; the higher value wins when observations disagree.
    pub fn priority(self) -> u8 {
        match self {
            DependencyChar::Mutual => 5,
            DependencyChar::RowDependsOnColumn
            | DependencyChar::ColumnDependsOnRow
            | DependencyChar::NoDependency => 4,
            DependencyChar::Documentation | DependencyChar::StrongSemantic => 3,
            DependencyChar::WeakSemantic => 2,
            DependencyChar::Placeholder | DependencyChar::Diagonal => 1,
            DependencyChar::Unset => 0,
        }
    }

    /// A character that records an actual relationship.
    pub fn is_dependency(self) -> bool {
        !matches!(
            self,
            DependencyChar::NoDependency
                | DependencyChar::Placeholder
                | DependencyChar::Diagonal
                | DependencyChar::Unset
        )
    }

    /// A verified statement about a pair: everything except `o`, `p` and the
    /// unset marker.
    pub fn is_observation(self) -> bool {
        !matches!(
            self,
            DependencyChar::Placeholder | DependencyChar::Diagonal | DependencyChar::Unset
        )
    }

    /// The same relationship seen from the other side.
    pub fn reversed(self) -> Self {
        match self {
            DependencyChar::RowDependsOnColumn => DependencyChar::ColumnDependsOnRow,
            DependencyChar::ColumnDependsOnRow => DependencyChar::RowDependsOnColumn,
            other => other,
        }
    }
}

impl TryFrom<char> for DependencyChar {
    type Error = InvalidDependencyChar;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        Ok(match c {
            'x' => DependencyChar::Mutual,
            '<' => DependencyChar::RowDependsOnColumn,
            '>' => DependencyChar::ColumnDependsOnRow,
            'n' => DependencyChar::NoDependency,
            'd' => DependencyChar::Documentation,
            'S' => DependencyChar::StrongSemantic,
            's' => DependencyChar::WeakSemantic,
            'p' => DependencyChar::Placeholder,
            'o' => DependencyChar::Diagonal,
            '.' => DependencyChar::Unset,
            other => return Err(InvalidDependencyChar(other)),
        })
    }
}

impl From<DependencyChar> for char {
    fn from(c: DependencyChar) -> Self {
        c.as_char()
    }
}

impl fmt::Display for DependencyChar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}
