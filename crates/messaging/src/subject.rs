//! Subjects are dot-separated token lists.
//!
//! Event types carry a domain prefix (`cloud.` by default) which is stripped
//! to form the wire subject. The mapping is only a true inverse for event
//! types that carry the prefix: `to_event_type(to_wire_subject("a.b"))`
//! yields `"cloud.a.b"`.
//!
//! Patterns support the usual wildcards:
//! - `*` matches exactly one token
//! - `>` matches one or more trailing tokens (must be the last token)

use crate::Error;

/// Prefix stripped from event types to form wire subjects.
pub const DEFAULT_EVENT_TYPE_PREFIX: &str = "cloud.";

/// Suffix appended to a wire subject to form its dead-letter subject.
pub const DLQ_SUFFIX: &str = ".dlq";

/// Service name used when none is configured.
pub const DEFAULT_SERVICE_NAME: &str = "default";

/// Translates event types to and from wire subjects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubjectMapper {
    prefix: String,
}

impl Default for SubjectMapper {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_TYPE_PREFIX)
    }
}

impl SubjectMapper {
    /// Creates a mapper for the given domain prefix (including its trailing dot).
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The domain prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Strips the domain prefix from an event type.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` for a blank event type, or one that is
    /// nothing but the prefix.
    pub fn to_wire_subject(&self, event_type: &str) -> Result<String, Error> {
        if event_type.trim().is_empty() {
            return Err(Error::invalid("event type must not be blank"));
        }

        let subject = event_type.strip_prefix(&self.prefix).unwrap_or(event_type);
        if subject.is_empty() {
            return Err(Error::invalid(format!(
                "event type '{event_type}' has no tokens after the prefix"
            )));
        }

        Ok(subject.to_string())
    }

    /// Prepends the domain prefix to a wire subject.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` for a blank subject.
    pub fn to_event_type(&self, subject: &str) -> Result<String, Error> {
        if subject.trim().is_empty() {
            return Err(Error::invalid("subject must not be blank"));
        }

        Ok(format!("{}{subject}", self.prefix))
    }
}

/// [`SubjectMapper::to_wire_subject`] with the default prefix.
///
/// # Errors
///
/// Returns `Error::InvalidArgument` for a blank event type.
pub fn to_wire_subject(event_type: &str) -> Result<String, Error> {
    SubjectMapper::default().to_wire_subject(event_type)
}

/// [`SubjectMapper::to_event_type`] with the default prefix.
///
/// # Errors
///
/// Returns `Error::InvalidArgument` for a blank subject.
pub fn to_event_type(subject: &str) -> Result<String, Error> {
    SubjectMapper::default().to_event_type(subject)
}

/// The dead-letter subject for a wire subject.
#[must_use]
pub fn dlq_subject(wire_subject: &str) -> String {
    format!("{wire_subject}{DLQ_SUFFIX}")
}

/// Deterministic durable consumer name for a service and wire pattern.
///
/// Instances sharing a service name and pattern land on the same name and
/// therefore share one delivery group.
#[must_use]
pub fn durable_name(service_name: &str, wire_pattern: &str) -> String {
    let service_name = service_name.trim();
    let service_name = if service_name.is_empty() {
        DEFAULT_SERVICE_NAME
    } else {
        service_name
    };

    format!("{}_{}", sanitize(service_name), sanitize(wire_pattern))
}

fn sanitize(raw: &str) -> String {
    let mut sanitized = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        match c {
            '*' => sanitized.push_str("_star_"),
            '>' => sanitized.push_str("_gt_"),
            '.' | '/' | '\\' => sanitized.push('_'),
            c if c.is_whitespace() => sanitized.push('_'),
            c => sanitized.push(c),
        }
    }
    sanitized
}

/// Validates a literal subject (no wildcards).
///
/// # Errors
///
/// Returns `Error::InvalidArgument` when the subject is empty, has an empty
/// token, contains a wildcard or a character outside `[A-Za-z0-9_-]`.
pub fn validate_subject(subject: &str) -> Result<(), Error> {
    if subject.is_empty() {
        return Err(Error::invalid("subject must not be empty"));
    }

    if subject.contains(['*', '>']) {
        return Err(Error::invalid(format!(
            "subject '{subject}' must not contain wildcards"
        )));
    }

    subject.split('.').try_for_each(|token| validate_literal_token(subject, token))
}

/// Validates a subject pattern.
///
/// # Errors
///
/// Returns `Error::InvalidArgument` when the pattern is empty, has an empty
/// token, misplaces `>` or contains a character outside `[A-Za-z0-9_-]`.
pub fn validate_subject_pattern(pattern: &str) -> Result<(), Error> {
    if pattern.is_empty() {
        return Err(Error::invalid("subject pattern must not be empty"));
    }

    let tokens: Vec<&str> = pattern.split('.').collect();
    let last = tokens.len() - 1;

    for (i, token) in tokens.iter().enumerate() {
        match *token {
            ">" if i != last => {
                return Err(Error::invalid(format!(
                    "'>' must be the last token in '{pattern}'"
                )));
            }
            ">" | "*" => {}
            literal => validate_literal_token(pattern, literal)?,
        }
    }

    Ok(())
}

fn validate_literal_token(whole: &str, token: &str) -> Result<(), Error> {
    if token.is_empty() {
        return Err(Error::invalid(format!("empty token in '{whole}'")));
    }

    if !token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::invalid(format!(
            "token '{token}' in '{whole}' contains invalid characters"
        )));
    }

    Ok(())
}

/// Whether a literal subject matches a pattern.
#[must_use]
pub fn subject_matches_pattern(subject: &str, pattern: &str) -> bool {
    let mut subject_tokens = subject.split('.');
    let mut pattern_tokens = pattern.split('.');

    loop {
        match (subject_tokens.next(), pattern_tokens.next()) {
            (Some(_), Some(">")) => return true,
            (Some(_), Some("*")) => {}
            (Some(s), Some(p)) if s == p => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
