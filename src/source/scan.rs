//! Cursor-based enumeration of a finite keyspace.

use std::{
    collections::VecDeque,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_lock::Mutex;
use regex::Regex;

use super::KeySource;
use crate::{
    error::{ConfigError, SourceError},
    observability::{log_debug, log_info, log_warn},
    option::ScanOption,
    record::Key,
};

/// One page of a cursor scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub keys: Vec<Key>,
    /// Cursor to continue from, `None` once the scan is complete.
    pub cursor: Option<String>,
}

/// Store-side cursor scan.
///
/// A scan starts with `cursor = None` and is complete once a page comes back
/// without a cursor. Pages may be empty while the cursor is still live.
pub trait KeyScanner: Send + Sync + 'static {
    fn scan(
        &self,
        cursor: Option<&str>,
        count: usize,
    ) -> impl Future<Output = Result<ScanPage, SourceError>> + Send;
}

impl<T: KeyScanner> KeyScanner for Arc<T> {
    fn scan(
        &self,
        cursor: Option<&str>,
        count: usize,
    ) -> impl Future<Output = Result<ScanPage, SourceError>> + Send {
        T::scan(self, cursor, count)
    }
}

/// Glob-style key filter (`*`, `?`, `[abc]`, `[^a]`, `[a-z]`, `\x`).
#[derive(Debug, Clone)]
pub struct KeyPattern {
    glob: String,
    regex: Regex,
}

impl KeyPattern {
    pub fn new(glob: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(&glob_to_regex(glob)).map_err(|source| ConfigError::Pattern {
            pattern: glob.to_string(),
            source,
        })?;
        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("(?s)^");
    let mut chars = glob.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(escaped.encode_utf8(&mut [0; 4]))),
                None => out.push_str(r"\\"),
            },
            '[' => {
                let mut raw = String::new();
                let mut class = String::from("[");
                let mut closed = false;
                let mut first = true;
                while let Some(n) = chars.next() {
                    if n == ']' {
                        closed = true;
                        break;
                    }
                    raw.push(n);
                    match n {
                        '^' if first => class.push('^'),
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                raw.push(escaped);
                                class.push_str(&regex::escape(escaped.encode_utf8(&mut [0; 4])));
                            }
                        }
                        // regex treats these as nested classes or set operators
                        '[' | '&' | '~' => {
                            class.push('\\');
                            class.push(n);
                        }
                        other => class.push(other),
                    }
                    first = false;
                }
                if closed && class.len() > 1 && class != "[^" {
                    class.push(']');
                    out.push_str(&class);
                } else {
                    out.push_str(&regex::escape("["));
                    out.push_str(&regex::escape(&raw));
                    if closed {
                        out.push_str(&regex::escape("]"));
                    }
                }
            }
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    out
}

#[derive(Debug, Default)]
struct ScanState {
    cursor: Option<String>,
    complete: bool,
    buffer: VecDeque<Key>,
}

/// [`KeySource`] over a [`KeyScanner`].
///
/// Cursor and look-ahead buffer live behind one lock, so concurrent `next`
/// calls never observe the same key.
pub struct ScanKeySource<S> {
    scanner: S,
    count: usize,
    pattern: Option<KeyPattern>,
    state: Mutex<ScanState>,
    started: AtomicBool,
    stopped: AtomicBool,
    exhausted: AtomicBool,
}

impl<S> ScanKeySource<S>
where
    S: KeyScanner,
{
    pub fn new(scanner: S, option: ScanOption) -> Result<Self, ConfigError> {
        option.validate()?;
        let pattern = option.pattern.as_deref().map(KeyPattern::new).transpose()?;
        Ok(Self {
            scanner,
            count: option.count,
            pattern,
            state: Mutex::new(ScanState::default()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            exhausted: AtomicBool::new(false),
        })
    }

    pub fn scanner(&self) -> &S {
        &self.scanner
    }

    fn accept(&self, key: &str) -> bool {
        self.pattern.as_ref().map_or(true, |p| p.matches(key))
    }
}

impl<S> KeySource for ScanKeySource<S>
where
    S: KeyScanner,
{
    async fn start(&self) -> Result<(), SourceError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        log_info!(
            component = "source",
            event = "scan_started",
            count = self.count,
            pattern = ?self.pattern.as_ref().map(KeyPattern::as_str),
        );
        Ok(())
    }

    fn has_next(&self) -> bool {
        !self.exhausted.load(Ordering::Acquire)
    }

    async fn next(&self, n: usize) -> Result<Vec<Key>, SourceError> {
        if !self.started.load(Ordering::Acquire) {
            return Err(SourceError::NotStarted);
        }
        let mut state = self.state.lock().await;
        while state.buffer.len() < n && !state.complete {
            if self.stopped.load(Ordering::Acquire) {
                break;
            }
            let cursor = state.cursor.clone();
            let page = match self.scanner.scan(cursor.as_deref(), self.count).await {
                Ok(page) => page,
                Err(err) => {
                    log_warn!(
                        component = "source",
                        event = "scan_failed",
                        cursor = ?cursor,
                        error = %err,
                    );
                    state.complete = true;
                    if state.buffer.is_empty() {
                        self.exhausted.store(true, Ordering::Release);
                    }
                    return Err(err);
                }
            };
            log_debug!(
                component = "source",
                event = "scan_page",
                keys = page.keys.len(),
                complete = page.cursor.is_none(),
            );
            let keys = page.keys.into_iter().filter(|key| self.accept(key));
            state.buffer.extend(keys);
            state.complete = page.cursor.is_none();
            state.cursor = page.cursor;
        }
        if self.stopped.load(Ordering::Acquire) {
            state.buffer.clear();
            return Ok(Vec::new());
        }

        let take = n.min(state.buffer.len());
        let batch: Vec<Key> = state.buffer.drain(..take).collect();
        if state.complete && state.buffer.is_empty() {
            self.exhausted.store(true, Ordering::Release);
        }
        Ok(batch)
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.exhausted.store(true, Ordering::Release);
        // a caller mid-scan clears the buffer itself once it sees `stopped`
        if let Some(mut state) = self.state.try_lock() {
            state.buffer.clear();
            state.cursor = None;
            state.complete = true;
        }
        log_debug!(component = "source", event = "scan_stopped");
    }
}
