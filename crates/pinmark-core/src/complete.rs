//! Tag completion for the tags input field.

use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::tags::TagFrequencyTable;
use crate::Tag;

/// Most completions offered at once.
pub const MAX_COMPLETIONS: usize = 9;
/// Quiet period before raw input is matched.
pub const DEBOUNCE: Duration = Duration::from_millis(250);

fn is_separator(c: char) -> bool {
    c.is_whitespace() || c == ','
}

/// Completions for the last (partial) word of `input`.
///
/// Earlier words and `already_chosen` are never offered. With
/// `sort_by_frequency` the most used tags come first; ties, and everything
/// when frequency sorting is off, are in plain string order.
pub fn match_tags(
    input: &str,
    snapshot: &TagFrequencyTable,
    already_chosen: &[Tag],
    sort_by_frequency: bool,
    limit: usize,
) -> Vec<Tag> {
    let mut words: Vec<&str> = input.split(is_separator).collect();
    let partial = words.pop().unwrap_or_default().to_lowercase();
    if partial.is_empty() {
        return Vec::new();
    }
    let chosen: BTreeSet<&str> = words
        .into_iter()
        .chain(already_chosen.iter().map(String::as_str))
        .filter(|w| !w.is_empty())
        .collect();
    let mut found: Vec<(&String, u64)> = snapshot
        .tags
        .iter()
        .filter(|(tag, _)| tag.to_lowercase().starts_with(&partial))
        .filter(|(tag, _)| !chosen.contains(tag.as_str()))
        .map(|(tag, n)| (tag, *n))
        .collect();
    found.sort_by(|(a, na), (b, nb)| {
        let by_count = if sort_by_frequency {
            nb.cmp(na)
        } else {
            std::cmp::Ordering::Equal
        };
        by_count.then_with(|| a.cmp(b))
    });
    found.truncate(limit);
    found.into_iter().map(|(t, _)| t.clone()).collect()
}

/// Replaces the partial word with `tag`. `None` when the tag is already there.
pub fn commit(text: &str, tag: &str) -> Option<String> {
    let mut words: Vec<&str> = text.split(is_separator).collect();
    words.pop();
    words.retain(|w| !w.is_empty());
    if words.contains(&tag) {
        return None;
    }
    words.push(tag);
    Some(words.join(" ") + " ")
}

/// Whether every one of `tags` is already among the space separated `current` tags.
pub fn has_tags(current: &str, tags: &[Tag]) -> bool {
    let have: BTreeSet<&str> = current.split(' ').filter(|t| !t.is_empty()).collect();
    !current.trim().is_empty() && tags.iter().all(|t| have.contains(t.as_str()))
}

/// Adds the tags that are missing; when none are missing, removes them all.
pub fn toggle_tags(current: &str, tags: &[Tag]) -> String {
    let mut all: Vec<&str> = current.split(' ').filter(|t| !t.is_empty()).collect();
    let new: Vec<&str> = tags
        .iter()
        .map(String::as_str)
        .filter(|t| !all.contains(t))
        .collect();
    if new.is_empty() {
        all.retain(|t| !tags.iter().any(|x| x == t));
    } else {
        all.extend(new);
    }
    all.join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavKey {
    Home,
    End,
    Up,
    Down,
    Enter,
    Tab,
    Right,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Not ours; let the input handle it.
    PassThrough,
    /// Selection moved (or stayed at an edge).
    Moved(usize),
    /// The selected tag was committed; this is the new input text.
    Committed(String),
    /// Commit key on a tag that is already present.
    Unchanged,
}

/// The visible completion list and its selection.
///
/// Entries are shown in reverse match order so the best match sits next to the
/// input; it starts out selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionList {
    shown: Vec<Tag>,
    selected: usize,
}

impl CompletionList {
    /// `None` for an empty match list.
    pub fn from_matches(mut matches: Vec<Tag>) -> Option<Self> {
        if matches.is_empty() {
            return None;
        }
        matches.reverse();
        let selected = matches.len() - 1;
        Some(Self {
            shown: matches,
            selected,
        })
    }

    pub fn shown(&self) -> &[Tag] {
        &self.shown
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn selected_tag(&self) -> &str {
        &self.shown[self.selected]
    }

    fn last(&self) -> usize {
        self.shown.len() - 1
    }

    /// Moves the selection; commit keys are left to the caller.
    pub fn navigate(&mut self, key: NavKey) -> bool {
        match key {
            NavKey::Home => self.selected = 0,
            NavKey::End => self.selected = self.last(),
            NavKey::Down => self.selected = (self.selected + 1).min(self.last()),
            NavKey::Up => self.selected = self.selected.saturating_sub(1),
            _ => return false,
        }
        true
    }
}

/// State of the tags input: current text plus completions.
#[derive(Debug, Clone)]
pub struct TagEntry {
    text: String,
    completions: Option<CompletionList>,
    sort_by_frequency: bool,
    limit: usize,
}

impl TagEntry {
    pub fn new(text: impl Into<String>, sort_by_frequency: bool) -> Self {
        Self {
            text: text.into(),
            completions: None,
            sort_by_frequency,
            limit: MAX_COMPLETIONS,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn completions(&self) -> Option<&CompletionList> {
        self.completions.as_ref()
    }

    /// Re-matches after the (debounced) input changed. Returns whether the list changed;
    /// an identical list keeps its selection.
    pub fn input_changed(&mut self, text: &str, snapshot: &TagFrequencyTable) -> bool {
        self.text = text.to_string();
        let matches = match_tags(text, snapshot, &[], self.sort_by_frequency, self.limit);
        let same = match &self.completions {
            Some(list) => list.shown.iter().rev().eq(matches.iter()),
            None => matches.is_empty(),
        };
        if same {
            return false;
        }
        self.completions = CompletionList::from_matches(matches);
        true
    }

    pub fn key(&mut self, key: NavKey, snapshot: &TagFrequencyTable) -> KeyOutcome {
        let Some(list) = self.completions.as_mut() else {
            return KeyOutcome::PassThrough;
        };
        match key {
            NavKey::Enter | NavKey::Tab | NavKey::Right => {
                let tag = list.selected_tag().to_string();
                self.select(&tag, snapshot)
            }
            NavKey::Other => KeyOutcome::PassThrough,
            nav => {
                list.navigate(nav);
                KeyOutcome::Moved(list.selected)
            }
        }
    }

    /// Commits `tag` in place of the partial word (also used when a completion is clicked).
    pub fn select(&mut self, tag: &str, snapshot: &TagFrequencyTable) -> KeyOutcome {
        match commit(&self.text, tag) {
            Some(text) => {
                self.input_changed(&text, snapshot);
                KeyOutcome::Committed(text)
            }
            None => KeyOutcome::Unchanged,
        }
    }
}

/// Forwards raw input values once they have been quiet for `interval`,
/// skipping a value equal to the last one forwarded.
pub fn debounce_distinct(
    mut input: mpsc::Receiver<String>,
    interval: Duration,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut last: Option<String> = None;
        while let Some(mut latest) = input.recv().await {
            let mut closed = false;
            loop {
                tokio::select! {
                    next = input.recv() => match next {
                        Some(v) => latest = v,
                        None => {
                            closed = true;
                            break;
                        }
                    },
                    _ = tokio::time::sleep(interval) => break,
                }
            }
            if last.as_deref() != Some(latest.as_str()) {
                if tx.send(latest.clone()).await.is_err() {
                    return;
                }
                last = Some(latest);
            }
            if closed {
                return;
            }
        }
    });
    rx
}

/// Keystroke side of [`debounce_distinct`]. Dropping it flushes the pending value.
pub struct Debouncer {
    tx: mpsc::Sender<String>,
}

impl Debouncer {
    pub fn spawn(interval: Duration) -> (Self, mpsc::Receiver<String>) {
        let (tx, raw) = mpsc::channel(64);
        (Self { tx }, debounce_distinct(raw, interval))
    }

    pub async fn push(&self, value: impl Into<String>) -> bool {
        self.tx.send(value.into()).await.is_ok()
    }
}
