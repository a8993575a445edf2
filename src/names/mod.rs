//! The set of well-known names held by a connection.

#[cfg(test)]
mod tests;

use std::collections::btree_set;
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, ErrorKind, Result};

/// Maximum length of a bus name.
const MAX_NAME_LENGTH: usize = 255;

/// The well-known bus names currently held by a connection.
///
/// A name is only present between a successful request and the matching
/// release.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct NameSet {
    names: BTreeSet<Box<str>>,
}

impl NameSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Test if the given name is held.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Number of held names.
    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Test if no names are held.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterate over held names in sorted order.
    #[inline]
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            iter: self.names.iter(),
        }
    }

    pub(crate) fn insert(&mut self, name: &str) {
        if !self.names.contains(name) {
            self.names.insert(name.into());
        }
    }

    pub(crate) fn remove(&mut self, name: &str) -> bool {
        self.names.remove(name)
    }

    pub(crate) fn clear(&mut self) {
        self.names.clear();
    }
}

impl fmt::Debug for NameSet {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a NameSet {
    type Item = &'a str;
    type IntoIter = Iter<'a>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the names in a [`NameSet`].
pub struct Iter<'a> {
    iter: btree_set::Iter<'a, Box<str>>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a str;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(|name| name.as_ref())
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

/// Check that `name` is a well-known bus name which may be requested.
pub(crate) fn check(name: &str) -> Result<()> {
    if validate(name.as_bytes()) {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::InvalidBusName(name.into())))
    }
}

/// Validate a well-known bus name.
///
/// Unique names (starting with `:`) are assigned by the bus and can never be
/// requested, so they are rejected here.
pub(crate) const fn validate(bytes: &[u8]) -> bool {
    if bytes.is_empty() || bytes.len() > MAX_NAME_LENGTH {
        return false;
    }

    let mut bytes = bytes;
    let mut elements = 1;
    let mut start = true;

    while let [b, rest @ ..] = bytes {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'_' | b'-' => {
                start = false;
            }
            b'0'..=b'9' => {
                if start {
                    return false;
                }
            }
            b'.' => {
                if start {
                    return false;
                }

                elements += 1;
                start = true;
            }
            _ => {
                return false;
            }
        }

        bytes = rest;
    }

    !start && elements > 1
}
