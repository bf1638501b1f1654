//! Small shared types: HTTP-like methods, sort directions and slices.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The HTTP-like verb a request is made with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Read one or many resources.
    Get,
    /// Create one or many resources.
    Post,
    /// Update one or many resources.
    Put,
    /// Delete one or many resources.
    Delete,
}

impl Method {
    /// All supported methods, in declaration order.
    pub const ALL: [Method; 4] = [Method::Get, Method::Post, Method::Put, Method::Delete];

    /// Returns the canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            _ => Err(format!("unsupported method: {}", s)),
        }
    }
}

/// Sort direction for order-bys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending order.
    #[default]
    Ascending,
    /// Descending order.
    Descending,
}

impl SortDirection {
    /// Returns the query-string suffix for this direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortDirection::Ascending),
            "desc" => Ok(SortDirection::Descending),
            _ => Err(format!("unknown sort direction: {}", s)),
        }
    }
}

/// A half-open `[start, stop)` window over a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice {
    /// First row, inclusive.
    pub start: usize,
    /// Last row, exclusive.
    pub stop: usize,
}

impl Slice {
    /// Creates a new slice. `stop` is clamped to be at least `start`.
    pub fn new(start: usize, stop: usize) -> Self {
        Self {
            start,
            stop: stop.max(start),
        }
    }

    /// Number of rows covered by the slice.
    pub fn width(&self) -> usize {
        self.stop - self.start
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.start, self.stop)
    }
}

impl FromStr for Slice {
    type Err = String;

    /// Parses `start,stop`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, stop) = s
            .split_once(',')
            .ok_or_else(|| format!("invalid slice: {}", s))?;
        let start = start
            .trim()
            .parse::<usize>()
            .map_err(|_| format!("invalid slice start: {}", start))?;
        let stop = stop
            .trim()
            .parse::<usize>()
            .map_err(|_| format!("invalid slice stop: {}", stop))?;
        Ok(Slice::new(start, stop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parse() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("DELETE".parse::<Method>().unwrap(), Method::Delete);
        assert!("PATCH".parse::<Method>().is_err());
        assert_eq!(Method::Put.to_string(), "PUT");
    }

    #[test]
    fn test_sort_direction() {
        assert_eq!(SortDirection::default(), SortDirection::Ascending);
        assert_eq!("desc".parse::<SortDirection>().unwrap(), SortDirection::Descending);
        assert!("down".parse::<SortDirection>().is_err());
    }

    #[test]
    fn test_slice_parse() {
        let slice: Slice = "10,30".parse().unwrap();
        assert_eq!(slice, Slice::new(10, 30));
        assert_eq!(slice.width(), 20);
        assert!("10".parse::<Slice>().is_err());
        assert!("a,b".parse::<Slice>().is_err());
        assert_eq!(Slice::new(5, 2).width(), 0);
    }
}
