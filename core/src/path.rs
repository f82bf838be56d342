//! Validated path values.
//!
//! Every path that crosses the VFS boundary is a [`SafePath`]: UTF-8, no
//! traversal segments, no reserved characters. Backends receive already
//! validated, already relative paths and only need to map them onto their
//! own storage.

use std::fmt;

use crate::error::{VfsError, VfsResult};

/// Characters that are rejected anywhere in a path.
const RESERVED: &[char] = &['<', '>', ':', '"', '\\', '|', '?', '*'];

/// A borrowed, validated path.
///
/// Invariants held by construction:
/// - valid UTF-8 (guaranteed by `&str`),
/// - no empty segments (`//`) and no trailing `/` (except the path `/`),
/// - none of `< > : " \ | ? *`,
/// - no `.` or `..` segments,
/// - no control characters, no whitespace other than space.
///
/// The empty path is valid and names "this directory".
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SafePath<'a> {
    raw: &'a str,
}

impl<'a> SafePath<'a> {
    /// Validate `s` and wrap it. Fails with [`VfsError::InvalidPath`] when
    /// any rule is violated. No reduction of `.`/`..` is attempted here;
    /// call sites that need reduction go through [`SafePathBuf::resolve`].
    pub fn new(s: &'a str) -> VfsResult<Self> {
        validate_chars(s)?;
        if s.split('/').any(|seg| seg == "." || seg == "..") {
            return Err(VfsError::InvalidPath);
        }
        Ok(Self { raw: s })
    }

    /// The empty path, naming the directory it is resolved against.
    pub const fn empty() -> SafePath<'static> {
        SafePath { raw: "" }
    }

    pub fn as_str(self) -> &'a str {
        self.raw
    }

    pub fn is_empty(self) -> bool {
        self.raw.is_empty()
    }

    /// A path is absolute iff its first byte is `/`.
    pub fn is_absolute(self) -> bool {
        self.raw.starts_with('/')
    }

    /// The path with the leading `/` stripped. Relative paths (and the
    /// empty path) come back unchanged.
    pub fn relative(self) -> SafePath<'a> {
        match self.raw.strip_prefix('/') {
            Some(rest) => SafePath { raw: rest },
            None => self,
        }
    }
}

impl fmt::Debug for SafePath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SafePath({:?})", self.raw)
    }
}

impl fmt::Display for SafePath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.raw)
    }
}

/// An owned path that has been validated and reduced.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct SafePathBuf {
    raw: String,
}

impl SafePathBuf {
    /// Validate `s`, additionally reducing `.` and `..` segments against an
    /// accumulated segment stack. Reducing past the root fails with
    /// [`VfsError::InvalidPath`].
    ///
    /// This is the allocating entry point; [`SafePath::new`] is the
    /// allocation-free one that callers use after pre-resolving.
    pub fn resolve(s: &str) -> VfsResult<Self> {
        validate_chars(s)?;
        let absolute = s.starts_with('/');
        let mut segments: Vec<&str> = Vec::new();
        for seg in s.split('/').filter(|seg| !seg.is_empty()) {
            match seg {
                "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(VfsError::InvalidPath);
                    }
                }
                _ => segments.push(seg),
            }
        }
        let mut raw = String::with_capacity(s.len());
        if absolute {
            raw.push('/');
        }
        raw.push_str(&segments.join("/"));
        Ok(Self { raw })
    }

    pub fn as_path(&self) -> SafePath<'_> {
        SafePath { raw: &self.raw }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for SafePathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Character-level rules shared by validation and resolution. Segment rules
/// (`.`/`..`) are layered on top by the respective entry points.
fn validate_chars(s: &str) -> VfsResult<()> {
    if s.contains("//") {
        return Err(VfsError::InvalidPath);
    }
    if s.len() > 1 && s.ends_with('/') {
        return Err(VfsError::InvalidPath);
    }
    for ch in s.chars() {
        if ch.is_control() {
            return Err(VfsError::InvalidPath);
        }
        if ch.is_whitespace() && ch != ' ' {
            return Err(VfsError::InvalidPath);
        }
        if RESERVED.contains(&ch) {
            return Err(VfsError::InvalidPath);
        }
    }
    Ok(())
}
