//! Data paths: an ordered list of property names and array indices.
//!
//! Rendered with dots (`specification.requests.cpu`, `tags.1`) for humans and
//! as JSON Pointers (`/tags/1`) for tooling. The empty path is the document root.
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(Vec<Segment>);

impl Path {
    pub fn root() -> Self { Self(Vec::new()) }

    pub fn is_root(&self) -> bool { self.0.is_empty() }

    pub fn segments(&self) -> &[Segment] { &self.0 }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn key(&self, name: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.0.push(Segment::Key(name.into()));
        next
    }

    pub fn index(&self, index: usize) -> Self {
        let mut next = self.clone();
        next.0.push(Segment::Index(index));
        next
    }

    pub fn parent(&self) -> Option<(Path, &Segment)> {
        let (last, init) = self.0.split_last()?;
        Some((Path(init.to_vec()), last))
    }

    pub fn last(&self) -> Option<&Segment> { self.0.last() }

    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// JSON Pointer form (RFC 6901).
    pub fn to_pointer(&self) -> String {
        let mut out = String::new();
        for seg in &self.0 {
            out.push('/');
            match seg {
                Segment::Key(k) => out.push_str(&k.replace('~', "~0").replace('/', "~1")),
                Segment::Index(i) => out.push_str(&i.to_string()),
            }
        }
        out
    }
}

impl From<Vec<Segment>> for Path {
    fn from(segments: Vec<Segment>) -> Self { Self(segments) }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => f.write_str(k),
            Segment::Index(i) => write!(f, "{i}"),
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 { f.write_str(".")?; }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

/// Dotted form; all-digit segments become indices. `""` and `"."` are the root.
impl FromStr for Path {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "." {
            return Ok(Path::root());
        }
        let segments = s
            .split('.')
            .map(|part| match part.parse::<usize>() {
                Ok(i) if !part.starts_with('+') => Segment::Index(i),
                _ => Segment::Key(part.to_string()),
            })
            .collect();
        Ok(Path(segments))
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_round_trip() {
        let p: Path = "specification.requests.cpu".parse().unwrap();
        assert_eq!(p.len(), 3);
        assert_eq!(p.to_string(), "specification.requests.cpu");

        let p: Path = "tags.1".parse().unwrap();
        assert_eq!(p.segments()[1], Segment::Index(1));
        assert_eq!(p.to_pointer(), "/tags/1");
    }

    #[test]
    fn root_forms() {
        assert!("".parse::<Path>().unwrap().is_root());
        assert!(".".parse::<Path>().unwrap().is_root());
        assert_eq!(Path::root().to_string(), "");
    }

    #[test]
    fn pointer_escapes() {
        let p = Path::root().key("a/b").key("c~d");
        assert_eq!(p.to_pointer(), "/a~1b/c~0d");
    }
}
