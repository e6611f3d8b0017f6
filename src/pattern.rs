// ABOUTME: Lua's bespoke pattern sub-language: a direct backtracking matcher,
// ABOUTME: not a transpile to the host regex engine (spec §4.5, §9)

use crate::error::RuntimeError;

const CAP_UNFINISHED: isize = -1;
const CAP_POSITION: isize = -2;
const MAX_DEPTH: u32 = 220;

/// One capture recorded during a match: a byte range, or (for `()`) a
/// 1-based source position.
#[derive(Debug, Clone)]
pub enum Capture {
    Range(usize, usize),
    Position(usize),
}

pub struct MatchResult {
    pub start: usize,
    pub end: usize,
    pub captures: Vec<Capture>,
}

struct RawCapture {
    start: usize,
    len: isize,
}

struct MatchState<'a> {
    src: &'a [u8],
    pat: &'a [u8],
    captures: Vec<RawCapture>,
    depth: u32,
}

fn malformed(msg: &str) -> RuntimeError {
    RuntimeError::new(format!("malformed pattern ({msg})"))
}

fn is_word(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn is_space(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

/// Matches a single character class letter (`a d l u w s p c`, spec §4.5
/// table). Uppercase negates. Any other letter after `%` matches itself
/// literally (`%X` for punctuation `X`).
fn match_class(c: u8, cl: u8) -> bool {
    let lower = cl.to_ascii_lowercase();
    let res = match lower {
        b'a' => c.is_ascii_alphabetic(),
        b'd' => c.is_ascii_digit(),
        b'l' => c.is_ascii_lowercase(),
        b'u' => c.is_ascii_uppercase(),
        b'w' => is_word(c),
        b's' => is_space(c),
        b'p' => c.is_ascii_punctuation(),
        b'c' => c.is_ascii_control(),
        _ => return cl == c,
    };
    if cl.is_ascii_uppercase() {
        !res
    } else {
        res
    }
}

/// Matches `c` against a `[set]` item spanning `pat[p..=ec]` where `ec` is
/// the index of the closing `]`.
fn match_bracket_class(c: u8, pat: &[u8], p: usize, ec: usize) -> bool {
    let mut p = p + 1; // skip '['
    let mut positive = true;
    if p < pat.len() && pat[p] == b'^' {
        positive = false;
        p += 1;
    }
    while p < ec {
        if pat[p] == b'%' {
            p += 1;
            if p < ec + 1 && match_class(c, pat[p]) {
                return positive;
            }
            p += 1;
        } else if p + 2 < ec && pat[p + 1] == b'-' {
            if pat[p] <= c && c <= pat[p + 2] {
                return positive;
            }
            p += 3;
        } else {
            if pat[p] == c {
                return positive;
            }
            p += 1;
        }
    }
    !positive
}

/// Finds the end of the single pattern item starting at `p` (a literal
/// byte, `%X` escape, or `[set]`), not including any trailing quantifier.
fn classend(pat: &[u8], p: usize) -> Result<usize, RuntimeError> {
    if p >= pat.len() {
        return Err(malformed("unexpected end"));
    }
    let c = pat[p];
    let mut p = p + 1;
    match c {
        b'%' => {
            if p >= pat.len() {
                return Err(malformed("ends with '%'"));
            }
            Ok(p + 1)
        }
        b'[' => {
            if p < pat.len() && pat[p] == b'^' {
                p += 1;
            }
            loop {
                if p >= pat.len() {
                    return Err(malformed("missing ']'"));
                }
                let cc = pat[p];
                p += 1;
                if cc == b'%' {
                    if p >= pat.len() {
                        return Err(malformed("ends with '%'"));
                    }
                    p += 1;
                }
                if p < pat.len() && pat[p] == b']' {
                    break;
                }
                if p >= pat.len() {
                    return Err(malformed("missing ']'"));
                }
            }
            Ok(p + 1)
        }
        _ => Ok(p),
    }
}

fn single_match(src: &[u8], s: usize, pat: &[u8], p: usize, ep: usize) -> bool {
    if s >= src.len() {
        return false;
    }
    let c = src[s];
    match pat[p] {
        b'.' => true,
        b'%' => match_class(c, pat[p + 1]),
        b'[' => match_bracket_class(c, pat, p, ep - 1),
        pc => pc == c,
    }
}

impl<'a> MatchState<'a> {
    fn tick(&mut self) -> Result<(), RuntimeError> {
        if self.depth == 0 {
            return Err(RuntimeError::new("pattern too complex"));
        }
        self.depth -= 1;
        Ok(())
    }

    fn start_capture(
        &mut self,
        s: usize,
        p: usize,
        what: isize,
    ) -> Result<Option<usize>, RuntimeError> {
        self.captures.push(RawCapture { start: s, len: what });
        let res = self.do_match(s, p)?;
        if res.is_none() {
            self.captures.pop();
        }
        Ok(res)
    }

    fn end_capture(&mut self, s: usize, p: usize) -> Result<Option<usize>, RuntimeError> {
        let idx = self
            .captures
            .iter()
            .rposition(|c| c.len == CAP_UNFINISHED)
            .ok_or_else(|| RuntimeError::new("invalid pattern capture"))?;
        self.captures[idx].len = (s - self.captures[idx].start) as isize;
        let res = self.do_match(s, p)?;
        if res.is_none() {
            self.captures[idx].len = CAP_UNFINISHED;
        }
        Ok(res)
    }

    fn match_capture(&mut self, s: usize, digit: u8) -> Result<Option<usize>, RuntimeError> {
        let idx = (digit - b'1') as usize;
        let cap = self
            .captures
            .get(idx)
            .filter(|c| c.len >= 0)
            .ok_or_else(|| RuntimeError::new("invalid capture index"))?;
        let (start, len) = (cap.start, cap.len as usize);
        if self.src.len() - s >= len && &self.src[start..start + len] == &self.src[s..s + len] {
            Ok(Some(s + len))
        } else {
            Ok(None)
        }
    }

    fn max_expand(&mut self, s: usize, p: usize, ep: usize) -> Result<Option<usize>, RuntimeError> {
        let mut i = 0usize;
        while single_match(self.src, s + i, self.pat, p, ep) {
            i += 1;
        }
        loop {
            if let Some(res) = self.do_match(s + i, ep + 1)? {
                return Ok(Some(res));
            }
            if i == 0 {
                return Ok(None);
            }
            i -= 1;
        }
    }

    fn min_expand(&mut self, mut s: usize, p: usize, ep: usize) -> Result<Option<usize>, RuntimeError> {
        loop {
            if let Some(res) = self.do_match(s, ep + 1)? {
                return Ok(Some(res));
            } else if single_match(self.src, s, self.pat, p, ep) {
                s += 1;
            } else {
                return Ok(None);
            }
        }
    }

    fn do_match(&mut self, mut s: usize, mut p: usize) -> Result<Option<usize>, RuntimeError> {
        self.tick()?;
        let result = loop {
            if p >= self.pat.len() {
                break Some(s);
            }
            match self.pat[p] {
                b'(' => {
                    if p + 1 < self.pat.len() && self.pat[p + 1] == b')' {
                        break self.start_capture(s, p + 2, CAP_POSITION)?;
                    } else {
                        break self.start_capture(s, p + 1, CAP_UNFINISHED)?;
                    }
                }
                b')' => {
                    break self.end_capture(s, p + 1)?;
                }
                b'$' if p + 1 == self.pat.len() => {
                    break if s == self.src.len() { Some(s) } else { None };
                }
                b'%' if p + 1 < self.pat.len() && self.pat[p + 1].is_ascii_digit() => {
                    match self.match_capture(s, self.pat[p + 1])? {
                        Some(s2) => {
                            s = s2;
                            p += 2;
                            continue;
                        }
                        None => break None,
                    }
                }
                _ => {
                    let ep = classend(self.pat, p)?;
                    let matched = single_match(self.src, s, self.pat, p, ep);
                    let quant = self.pat.get(ep).copied();
                    if !matched {
                        if matches!(quant, Some(b'*') | Some(b'?') | Some(b'-')) {
                            p = ep + 1;
                            continue;
                        }
                        break None;
                    }
                    match quant {
                        Some(b'?') => {
                            if let Some(res) = self.do_match(s + 1, ep + 1)? {
                                break Some(res);
                            }
                            p = ep + 1;
                            continue;
                        }
                        Some(b'+') => break self.max_expand(s + 1, p, ep)?,
                        Some(b'*') => break self.max_expand(s, p, ep)?,
                        Some(b'-') => break self.min_expand(s, p, ep)?,
                        _ => {
                            s += 1;
                            p = ep;
                            continue;
                        }
                    }
                }
            }
        };
        self.depth += 1;
        Ok(result)
    }
}

fn captures_from(ms: &MatchState, start: usize, end: usize) -> Vec<Capture> {
    if ms.captures.is_empty() {
        return vec![Capture::Range(start, end)];
    }
    ms.captures
        .iter()
        .map(|c| {
            if c.len == CAP_POSITION {
                Capture::Position(c.start + 1)
            } else {
                Capture::Range(c.start, c.start + c.len.max(0) as usize)
            }
        })
        .collect()
}

/// Searches `src` for `pattern` starting no earlier than byte `init`
/// (0-based). Honors a leading `^` anchor (tried once, not slid).
pub fn find(src: &[u8], pattern: &[u8], init: usize) -> Result<Option<MatchResult>, RuntimeError> {
    let anchored = pattern.first() == Some(&b'^');
    let pat = if anchored { &pattern[1..] } else { pattern };
    let mut s = init.min(src.len());
    loop {
        let mut ms = MatchState {
            src,
            pat,
            captures: Vec::new(),
            depth: MAX_DEPTH,
        };
        if let Some(end) = ms.do_match(s, 0)? {
            return Ok(Some(MatchResult {
                start: s,
                end,
                captures: captures_from(&ms, s, end),
            }));
        }
        if anchored || s >= src.len() {
            return Ok(None);
        }
        s += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find_str(s: &str, p: &str) -> Option<(usize, usize)> {
        find(s.as_bytes(), p.as_bytes(), 0)
            .unwrap()
            .map(|m| (m.start, m.end))
    }

    #[test]
    fn literal_match() {
        assert_eq!(find_str("hello world", "world"), Some((6, 11)));
    }

    #[test]
    fn class_plus_quantifier() {
        assert_eq!(find_str("abc123", "%d+"), Some((3, 6)));
    }

    #[test]
    fn anchored_pattern_only_tries_start() {
        assert_eq!(find_str("xhello", "^hello"), None);
        assert_eq!(find_str("hello", "^hello"), Some((0, 5)));
    }

    #[test]
    fn lazy_quantifier_is_shortest() {
        let m = find(b"<a><b>", b"<(.-)>", 0).unwrap().unwrap();
        match &m.captures[0] {
            Capture::Range(s, e) => assert_eq!(&b"<a><b>"[*s..*e], b"a"),
            _ => panic!("expected range capture"),
        }
    }

    #[test]
    fn greedy_quantifier_is_longest() {
        let m = find(b"<a><b>", b"<(.*)>", 0).unwrap().unwrap();
        match &m.captures[0] {
            Capture::Range(s, e) => assert_eq!(&b"<a><b>"[*s..*e], b"a><b"),
            _ => panic!("expected range capture"),
        }
    }

    #[test]
    fn bracket_set_with_range() {
        assert_eq!(find_str("foo-42", "[0-9]+"), Some((4, 6)));
    }

    #[test]
    fn negated_bracket_set() {
        assert_eq!(find_str("  hi", "[^ ]+"), Some((2, 4)));
    }

    #[test]
    fn position_capture_returns_index() {
        let m = find(b"abc", b"a()b", 0).unwrap().unwrap();
        match &m.captures[0] {
            Capture::Position(p) => assert_eq!(*p, 2),
            _ => panic!("expected position capture"),
        }
    }

    #[test]
    fn no_match_returns_none() {
        assert_eq!(find_str("abc", "xyz"), None);
    }
}

