//! Three-way text merge.
//!
//! The local edit is extracted as a character diff of `base -> local`,
//! grouped into context-carrying hunks, and replayed on top of `remote`.
//! Each hunk either applies cleanly (its context is found in the remote
//! text) or is skipped; the fraction that applied is the merge confidence.
//!
//! This is a heuristic. It has no notion of document structure and makes
//! no correctness claim beyond "every applied hunk found its context".

/// Characters of unchanged context kept on each side of a hunk.
const PATCH_MARGIN: usize = 4;

/// Outcome of a three-way merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    /// Merged text
    pub text: String,
    /// Fraction of local hunks that applied cleanly, in `0.0..=1.0`
    pub confidence: f64,
    /// True if the policy discarded the patched text in favour of `local`
    pub fell_back: bool,
}

/// Decides whether a patched result is trusted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergePolicy {
    threshold: f64,
}

impl MergePolicy {
    pub const DEFAULT_THRESHOLD: f64 = 0.5;

    /// Creates a policy; the threshold is clamped to `0.0..=1.0`.
    pub fn new(threshold: f64) -> Self {
        let threshold = if threshold.is_nan() {
            Self::DEFAULT_THRESHOLD
        } else {
            threshold.clamp(0.0, 1.0)
        };
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Merges and applies the fallback rule: below the threshold the local
    /// text wins verbatim.
    pub fn resolve(&self, base: &str, local: &str, remote: &str) -> MergeResult {
        let result = merge(base, local, remote);
        if result.confidence >= self.threshold {
            result
        } else {
            MergeResult {
                text: local.to_string(),
                confidence: result.confidence,
                fell_back: true,
            }
        }
    }
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}

/// Replays the `base -> local` edit onto `remote`.
///
/// Returns the patched text regardless of confidence; see
/// [`MergePolicy::resolve`] for the fallback rule.
pub fn merge(base: &str, local: &str, remote: &str) -> MergeResult {
    let base: Vec<char> = base.chars().collect();
    let local: Vec<char> = local.chars().collect();

    let hunks = build_hunks(&base, &changes(&base, &local));
    let (text, applied) = apply_hunks(&hunks, remote);

    let confidence = if hunks.is_empty() {
        1.0
    } else {
        applied as f64 / hunks.len() as f64
    };

    MergeResult {
        text,
        confidence,
        fell_back: false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit {
    Equal,
    Insert,
    Delete,
}

/// A contiguous replacement of `base[start..end]` by `insert`.
#[derive(Debug, Clone, PartialEq)]
struct Change {
    start: usize,
    end: usize,
    insert: Vec<char>,
}

#[derive(Debug, Clone, PartialEq)]
struct Hunk {
    /// Position of `before` in the base text
    start: usize,
    before: Vec<char>,
    after: Vec<char>,
}

/// Edit script from `a` to `b`, trimming the common prefix and suffix
/// before running Myers on the middle.
fn diff(a: &[char], b: &[char]) -> Vec<Edit> {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let mut edits = vec![Edit::Equal; prefix];
    edits.extend(myers(
        &a[prefix..a.len() - suffix],
        &b[prefix..b.len() - suffix],
    ));
    edits.extend(std::iter::repeat(Edit::Equal).take(suffix));
    edits
}

/// Edit cost past which the differing middle is replaced wholesale.
const MAX_EDIT_COST: usize = 1024;

fn myers(a: &[char], b: &[char]) -> Vec<Edit> {
    let n = a.len();
    let m = b.len();
    if n == 0 {
        return vec![Edit::Insert; m];
    }
    if m == 0 {
        return vec![Edit::Delete; n];
    }

    let max = n + m;
    let offset = max as isize;
    let at = |k: isize| (k + offset) as usize;
    let mut v = vec![0usize; 2 * max + 2];
    // trace[d] holds v[-d..=d] as it stood after step d.
    let mut trace: Vec<Vec<usize>> = Vec::new();
    let mut reached = false;

    'search: for d in 0..=max.min(MAX_EDIT_COST) as isize {
        let mut k = -d;
        while k <= d {
            let mut x = if k == -d || (k != d && v[at(k - 1)] < v[at(k + 1)]) {
                v[at(k + 1)]
            } else {
                v[at(k - 1)] + 1
            };
            let mut y = (x as isize - k) as usize;
            while x < n && y < m && a[x] == b[y] {
                x += 1;
                y += 1;
            }
            v[at(k)] = x;
            if x >= n && y >= m {
                reached = true;
                trace.push(v[at(-d)..=at(d)].to_vec());
                break 'search;
            }
            k += 2;
        }
        trace.push(v[at(-d)..=at(d)].to_vec());
    }

    if !reached {
        tracing::debug!(
            "diff of {} -> {} chars exceeds cost {}; replacing wholesale",
            n,
            m,
            MAX_EDIT_COST
        );
        let mut edits = vec![Edit::Delete; n];
        edits.extend(std::iter::repeat(Edit::Insert).take(m));
        return edits;
    }

    let mut edits = Vec::with_capacity(max);
    let (mut x, mut y) = (n as isize, m as isize);
    for d in (1..trace.len() as isize).rev() {
        let prev = &trace[(d - 1) as usize];
        let prev_v = |k: isize| prev[(k + d - 1) as usize] as isize;
        let k = x - y;
        let prev_k = if k == -d || (k != d && prev_v(k - 1) < prev_v(k + 1)) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = prev_v(prev_k);
        let prev_y = prev_x - prev_k;

        while x > prev_x && y > prev_y {
            edits.push(Edit::Equal);
            x -= 1;
            y -= 1;
        }
        edits.push(if x == prev_x { Edit::Insert } else { Edit::Delete });
        x = prev_x;
        y = prev_y;
    }
    while x > 0 && y > 0 {
        edits.push(Edit::Equal);
        x -= 1;
        y -= 1;
    }

    edits.reverse();
    edits
}

fn changes(base: &[char], local: &[char]) -> Vec<Change> {
    let mut out = Vec::new();
    let mut current: Option<Change> = None;
    let (mut i, mut j) = (0, 0);

    for edit in diff(base, local) {
        match edit {
            Edit::Equal => {
                out.extend(current.take());
                i += 1;
                j += 1;
            }
            Edit::Delete => {
                let change = current.get_or_insert_with(|| Change {
                    start: i,
                    end: i,
                    insert: Vec::new(),
                });
                change.end = i + 1;
                i += 1;
            }
            Edit::Insert => {
                current
                    .get_or_insert_with(|| Change {
                        start: i,
                        end: i,
                        insert: Vec::new(),
                    })
                    .insert
                    .push(local[j]);
                j += 1;
            }
        }
    }
    out.extend(current);
    out
}

fn build_hunks(base: &[char], changes: &[Change]) -> Vec<Hunk> {
    // Changes closer than two margins would share context.
    let mut groups: Vec<&[Change]> = Vec::new();
    let mut first = 0;
    for i in 1..=changes.len() {
        if i == changes.len() || changes[i].start - changes[i - 1].end >= 2 * PATCH_MARGIN {
            if i > first {
                groups.push(&changes[first..i]);
            }
            first = i;
        }
    }

    let mut hunks = Vec::with_capacity(groups.len());
    for (idx, group) in groups.iter().enumerate() {
        let start = group[0].start;
        let end = group[group.len() - 1].end;

        let mut body = Vec::new();
        let mut cursor = start;
        for change in group.iter() {
            body.extend_from_slice(&base[cursor..change.start]);
            body.extend_from_slice(&change.insert);
            cursor = change.end;
        }

        // Context may widen until unique, but never into a neighbouring hunk.
        let lower = if idx == 0 {
            0
        } else {
            groups[idx - 1][groups[idx - 1].len() - 1].end
        };
        let upper = groups
            .get(idx + 1)
            .map(|next| next[0].start)
            .unwrap_or(base.len());

        let mut margin = PATCH_MARGIN;
        let (ctx_start, ctx_end) = loop {
            let cs = start.saturating_sub(margin).max(lower);
            let ce = (end + margin).min(upper);
            let exhausted = cs == lower && ce == upper;
            if exhausted || cs == ce || occurrences(base, &base[cs..ce]) <= 1 {
                break (cs, ce);
            }
            margin += PATCH_MARGIN;
        };

        let mut after = base[ctx_start..start].to_vec();
        after.extend(body);
        after.extend_from_slice(&base[end..ctx_end]);

        hunks.push(Hunk {
            start: ctx_start,
            before: base[ctx_start..ctx_end].to_vec(),
            after,
        });
    }
    hunks
}

/// Applies hunks in order; returns the text and how many applied.
fn apply_hunks(hunks: &[Hunk], remote: &str) -> (String, usize) {
    let mut text: Vec<char> = remote.chars().collect();
    let mut drift: isize = 0;
    let mut applied = 0;

    for hunk in hunks {
        let expected = (hunk.start as isize + drift).clamp(0, text.len() as isize) as usize;
        let found = if hunk.before.is_empty() {
            Some(expected)
        } else {
            nearest_match(&text, &hunk.before, expected)
        };

        match found {
            Some(loc) => {
                text.splice(loc..loc + hunk.before.len(), hunk.after.iter().copied());
                drift = (loc + hunk.after.len()) as isize
                    - (hunk.start + hunk.before.len()) as isize;
                applied += 1;
            }
            None => {
                tracing::debug!(
                    "merge hunk at {} ({} chars) found no match",
                    hunk.start,
                    hunk.before.len()
                );
            }
        }
    }

    (text.into_iter().collect(), applied)
}

fn nearest_match(text: &[char], pattern: &[char], expected: usize) -> Option<usize> {
    if pattern.len() > text.len() {
        return None;
    }
    text.windows(pattern.len())
        .enumerate()
        .filter(|(_, window)| *window == pattern)
        .map(|(pos, _)| pos)
        .min_by_key(|pos| pos.abs_diff(expected))
}

fn occurrences(text: &[char], pattern: &[char]) -> usize {
    if pattern.is_empty() || pattern.len() > text.len() {
        return 0;
    }
    text.windows(pattern.len())
        .filter(|window| *window == pattern)
        .count()
}
