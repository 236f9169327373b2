// src/pattern/matcher.rs

//! Input selection: globs with captures, optional regex / suffix filters, excludes.

use std::collections::BTreeMap;
use std::fmt;

use globset::{Glob, GlobBuilder, GlobMatcher, GlobSet};
use regex::Regex;

use crate::errors::{PipedagError, Result};
use crate::pattern::bindings::Bindings;
use crate::pattern::build_globset;

/// Values captured from one input path.
///
/// `positional[0]` is the whole match (`{0}`); wildcard or regex groups follow
/// as `{1}`, `{2}`, ... Named regex groups are bound under their own name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures {
    pub positional: Vec<String>,
    pub named: BTreeMap<String, String>,
    pub basename: Option<String>,
}

impl Captures {
    /// Add every captured value to `bindings`.
    pub fn bind_into(&self, bindings: &mut Bindings) {
        for (i, value) in self.positional.iter().enumerate() {
            bindings.insert(i.to_string(), value.as_str());
        }
        for (name, value) in self.named.iter() {
            bindings.insert(name.clone(), value.as_str());
        }
        if let Some(ref b) = self.basename {
            bindings.insert("basename", b.as_str());
        }
    }
}

/// A path accepted by an [`InputMatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputMatch {
    pub path: String,
    pub captures: Captures,
}

struct CapturingGlob {
    matcher: GlobMatcher,
    extract: Regex,
}

/// Compiled input selection of one task.
pub struct InputMatcher {
    globs: Vec<CapturingGlob>,
    regex: Option<Regex>,
    suffix: Option<String>,
    exclude: Option<GlobSet>,
}

impl fmt::Debug for InputMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputMatcher")
            .field(
                "globs",
                &self.globs.iter().map(|g| g.matcher.glob().glob()).collect::<Vec<_>>(),
            )
            .field("regex", &self.regex.as_ref().map(Regex::as_str))
            .field("suffix", &self.suffix)
            .finish_non_exhaustive()
    }
}

impl InputMatcher {
    /// Compile a matcher. An empty `globs` list accepts every candidate; that
    /// is how `from`-only tasks take all outputs of their upstream tasks.
    pub fn new(
        globs: &[String],
        input_regex: Option<&str>,
        suffix: Option<&str>,
        exclude: &[String],
    ) -> Result<Self> {
        let mut compiled = Vec::with_capacity(globs.len());
        for pattern in globs {
            compiled.push(compile_capturing_glob(pattern)?);
        }

        let regex = match input_regex {
            Some(r) => Some(Regex::new(r).map_err(|e| PipedagError::InvalidPattern {
                pattern: r.to_string(),
                message: e.to_string(),
            })?),
            None => None,
        };

        let exclude = if exclude.is_empty() {
            None
        } else {
            Some(build_globset(exclude).map_err(|e| PipedagError::InvalidPattern {
                pattern: exclude.join(", "),
                message: e.to_string(),
            })?)
        };

        Ok(Self {
            globs: compiled,
            regex,
            suffix: suffix.map(str::to_string),
            exclude,
        })
    }

    /// Match one relative path. Returns `None` on no-match.
    pub fn match_path(&self, path: &str) -> Option<InputMatch> {
        if let Some(ref exclude) = self.exclude {
            if exclude.is_match(path) {
                return None;
            }
        }

        let mut captures = if self.globs.is_empty() {
            Captures {
                positional: vec![path.to_string()],
                ..Captures::default()
            }
        } else {
            let glob = self.globs.iter().find(|g| g.matcher.is_match(path))?;
            capture_groups(&glob.extract, path).unwrap_or_else(|| Captures {
                positional: vec![path.to_string()],
                ..Captures::default()
            })
        };

        if let Some(ref re) = self.regex {
            captures = capture_groups(re, path)?;
        }

        if let Some(ref suffix) = self.suffix {
            let stem = path.strip_suffix(suffix.as_str())?;
            captures.basename = Some(stem.to_string());
        }

        Some(InputMatch {
            path: path.to_string(),
            captures,
        })
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.match_path(path).is_some()
    }

    /// Match every candidate, preserving candidate order.
    pub fn match_all<'a, I>(&self, candidates: I) -> Vec<InputMatch>
    where
        I: IntoIterator<Item = &'a String>,
    {
        candidates
            .into_iter()
            .filter_map(|c| self.match_path(c))
            .collect()
    }
}

fn capture_groups(re: &Regex, path: &str) -> Option<Captures> {
    let caps = re.captures(path)?;
    let positional = caps
        .iter()
        .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
        .collect();
    let named = re
        .capture_names()
        .flatten()
        .filter_map(|name| {
            caps.name(name)
                .map(|m| (name.to_string(), m.as_str().to_string()))
        })
        .collect();
    Some(Captures {
        positional,
        named,
        basename: None,
    })
}

fn compile_capturing_glob(pattern: &str) -> Result<CapturingGlob> {
    let invalid = |message: String| PipedagError::InvalidPattern {
        pattern: pattern.to_string(),
        message,
    };
    let glob: Glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| invalid(e.to_string()))?;
    let extract =
        Regex::new(&glob_to_capture_regex(pattern)).map_err(|e| invalid(e.to_string()))?;
    Ok(CapturingGlob {
        matcher: glob.compile_matcher(),
        extract,
    })
}

/// Translate a glob into an anchored regex with one group per wildcard.
///
/// `*` and `?` never cross `/`; `**/` matches zero or more directories.
pub fn glob_to_capture_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut re = String::from("^");
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let at_segment_start = i == 0 || chars[i - 1] == '/';
                if at_segment_start && chars.get(i + 2) == Some(&'/') {
                    re.push_str("(?:(.*)/)?");
                    i += 3;
                } else {
                    re.push_str("(.*)");
                    i += 2;
                }
                continue;
            }
            '*' => re.push_str("([^/]*)"),
            '?' => re.push_str("([^/])"),
            '[' => {
                if let Some(end) = chars[i + 1..].iter().position(|&c| c == ']') {
                    let class: String = chars[i + 1..i + 1 + end].iter().collect();
                    let class = match class.strip_prefix('!') {
                        Some(rest) => format!("^{rest}"),
                        None => class,
                    };
                    re.push_str(&format!("([{}])", class.replace('\\', "\\\\")));
                    i += end + 2;
                    continue;
                }
                re.push_str(&regex::escape("["));
            }
            '{' => {
                if let Some(end) = chars[i + 1..].iter().position(|&c| c == '}') {
                    let alternatives: String = chars[i + 1..i + 1 + end].iter().collect();
                    let alts: Vec<String> =
                        alternatives.split(',').map(regex::escape).collect();
                    re.push_str(&format!("({})", alts.join("|")));
                    i += end + 2;
                    continue;
                }
                re.push_str(&regex::escape("{"));
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }

    re.push('$');
    re
}

#[cfg(test)]
mod tests {
    use super::*;

    fn globs(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn star_captures_stop_at_separator() {
        let m = InputMatcher::new(&globs(&["*.fastq.gz"]), None, None, &[]).unwrap();
        let hit = m.match_path("a.fastq.gz").unwrap();
        assert_eq!(hit.captures.positional, vec!["a.fastq.gz", "a"]);
        assert!(m.match_path("sub/a.fastq.gz").is_none());
        assert!(m.match_path("a.fastq").is_none());
    }

    #[test]
    fn double_star_matches_zero_or_more_directories() {
        let m = InputMatcher::new(&globs(&["**/*.bam"]), None, None, &[]).unwrap();
        let top = m.match_path("x.bam").unwrap();
        assert_eq!(top.captures.positional, vec!["x.bam", "", "x"]);
        let deep = m.match_path("mapped/s1/x.bam").unwrap();
        assert_eq!(deep.captures.positional, vec!["mapped/s1/x.bam", "mapped/s1", "x"]);
    }

    #[test]
    fn regex_groups_replace_glob_captures() {
        let m = InputMatcher::new(
            &globs(&["*NN.fastq.gz"]),
            Some(r"demux_NNN(?P<sample>.*)NN\.fastq\.gz"),
            None,
            &[],
        )
        .unwrap();
        let hit = m.match_path("demux_NNNs1NN.fastq.gz").unwrap();
        assert_eq!(hit.captures.positional[1], "s1");
        assert_eq!(hit.captures.named.get("sample").map(String::as_str), Some("s1"));
        assert!(m.match_path("other_s1NN.fastq.gz").is_none());
    }

    #[test]
    fn suffix_binds_basename_and_filters() {
        let m = InputMatcher::new(&[], None, Some(".sorted.bam"), &[]).unwrap();
        let hit = m.match_path("STARmapped/s1.sorted.bam").unwrap();
        assert_eq!(hit.captures.basename.as_deref(), Some("STARmapped/s1"));
        assert!(m.match_path("STARmapped/s1.bam").is_none());
    }

    #[test]
    fn excludes_win_over_matches() {
        let m = InputMatcher::new(&globs(&["*.txt"]), None, None, &globs(&["skip*"])).unwrap();
        assert!(m.is_match("keep.txt"));
        assert!(!m.is_match("skip.txt"));
    }

    #[test]
    fn invalid_patterns_are_reported() {
        let err = InputMatcher::new(&[], Some("(unclosed"), None, &[]).unwrap_err();
        assert!(matches!(err, PipedagError::InvalidPattern { .. }));
    }

    #[test]
    fn class_and_alternation_are_captured() {
        assert_eq!(glob_to_capture_regex("r[12].{fq,fastq}"), r"^r([12])\.(fq|fastq)$");
    }
}
