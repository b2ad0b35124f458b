// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Trace filtering

use super::event::{TraceCategory, TraceEvent};

/// Filter rule for trace events
#[derive(Debug, Clone)]
pub enum FilterRule {
    /// Include all events
    All,
    /// Include only these function names (exact match)
    Function(Vec<String>),
    /// Include functions matching a glob (`*` and `?`)
    Pattern(String),
    /// Include only these categories
    Category(Vec<TraceCategory>),
}

impl FilterRule {
    fn matches(&self, event: &TraceEvent) -> bool {
        match self {
            FilterRule::All => true,
            FilterRule::Function(names) => names.iter().any(|name| name == &event.function),
            FilterRule::Pattern(pattern) => matches_pattern(&event.function, pattern),
            FilterRule::Category(categories) => categories.contains(&event.category),
        }
    }
}

/// Trace filter; an event passes when any rule matches
#[derive(Debug, Clone)]
pub struct TraceFilter {
    rules: Vec<FilterRule>,
}

impl Default for TraceFilter {
    fn default() -> Self {
        Self {
            rules: vec![FilterRule::All],
        }
    }
}

impl TraceFilter {
    /// Create a filter that lets everything through
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter rule
    ///
    /// The first real rule replaces the implicit "all" rule.
    #[must_use]
    pub fn add_rule(mut self, rule: FilterRule) -> Self {
        if self.rules.len() == 1 && matches!(self.rules[0], FilterRule::All) {
            self.rules.clear();
        }
        self.rules.push(rule);
        self
    }

    pub fn should_trace(&self, event: &TraceEvent) -> bool {
        self.rules.is_empty() || self.rules.iter().any(|rule| rule.matches(event))
    }
}

/// Glob match with `*` (any run) and `?` (one character)
fn matches_pattern(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let (mut t, mut p) = (0, 0);
    // position of the last '*' seen and the text index it was tried at
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, t));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matching() {
        assert!(matches_pattern("mmap", "m*"));
        assert!(matches_pattern("munmap", "*map"));
        assert!(matches_pattern("mincore", "m*e"));
        assert!(matches_pattern("dlopen", "dlopen"));
        assert!(!matches_pattern("dlsym", "dlo*"));

        assert!(matches_pattern("dlsym", "dl???"));
        assert!(!matches_pattern("dlsym", "dl??"));
        assert!(matches_pattern("", "*"));
        assert!(!matches_pattern("", "?"));
    }

    #[test]
    fn test_filter_all() {
        let filter = TraceFilter::default();
        let event = TraceEvent::call("mmap", TraceCategory::Reserve);
        assert!(filter.should_trace(&event));
    }

    #[test]
    fn test_filter_function() {
        let filter = TraceFilter::new().add_rule(FilterRule::Function(vec!["mmap".to_string()]));

        assert!(filter.should_trace(&TraceEvent::call("mmap", TraceCategory::Reserve)));
        assert!(!filter.should_trace(&TraceEvent::call("munmap", TraceCategory::Release)));
    }

    #[test]
    fn test_filter_pattern() {
        let filter = TraceFilter::new().add_rule(FilterRule::Pattern("dl*".to_string()));

        assert!(filter.should_trace(&TraceEvent::call("dlopen", TraceCategory::Loader)));
        assert!(!filter.should_trace(&TraceEvent::call("mincore", TraceCategory::Probe)));
    }

    #[test]
    fn test_filter_category() {
        let filter = TraceFilter::new()
            .add_rule(FilterRule::Category(vec![TraceCategory::Probe]))
            .add_rule(FilterRule::Function(vec!["dlopen".to_string()]));

        assert!(filter.should_trace(&TraceEvent::call("mincore", TraceCategory::Probe)));
        assert!(filter.should_trace(&TraceEvent::call("dlopen", TraceCategory::Loader)));
        assert!(!filter.should_trace(&TraceEvent::call("mmap", TraceCategory::Reserve)));
    }
}
