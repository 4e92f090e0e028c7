//! Mock.js-style template expansion.
//!
//! A template is plain JSON. Object keys may carry a generation rule after a
//! `|` (`"list|1-10": [...]`, `"id|+1": 1`, `"price|1-100.2": 0`) and strings
//! may contain `@placeholder` or `@placeholder(args)` calls. Everything else
//! is copied through unchanged. Unknown placeholders stay in the output
//! verbatim so a typo shows up in the response instead of vanishing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{Datelike, NaiveDateTime, Timelike};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Number, Value};

/// Turns a response template into concrete data.
pub trait MockGenerator: Send + Sync {
    fn generate(&self, template: &Value) -> Value;
}

/// Floats stop here so they survive the round trip through `f64`.
const MAX_DECIMALS: u32 = 10;

/// Mock.js caps `@integer` at the largest exactly representable JS integer.
const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_992;

/// Upper bound for any single repeat count or text length taken from a template.
pub const MAX_REPEAT: usize = 10_000;

/// Repetitions one `generate` call may perform across all nesting levels:
/// array elements, string repeats, and placeholder words or characters.
/// Once spent, further repetition yields empty output.
pub const MAX_GENERATED_ITEMS: usize = 1_000_000;

pub struct TemplateGenerator {
    rng: Mutex<StdRng>,
    increment: AtomicI64,
}

impl Default for TemplateGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TemplateGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateGenerator")
            .field("increment", &self.increment.load(Ordering::Relaxed))
            .finish()
    }
}

impl TemplateGenerator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic generator, for tests and reproducible fixtures.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            increment: AtomicI64::new(0),
        }
    }
}

impl MockGenerator for TemplateGenerator {
    fn generate(&self, template: &Value) -> Value {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let mut ctx = Context {
            rng: &mut rng,
            increment: &self.increment,
            counters: HashMap::new(),
            budget: MAX_GENERATED_ITEMS,
        };
        ctx.value(template)
    }
}

// ============================================================================
// Key rules
// ============================================================================

/// Parsed `|rule` suffix of an object key.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct KeyRule {
    min: Option<i64>,
    max: Option<i64>,
    step: Option<i64>,
    dmin: Option<u32>,
    dmax: Option<u32>,
}

impl KeyRule {
    fn parse(rule: &str) -> Self {
        let rule = rule.trim();
        let mut out = KeyRule::default();
        if let Some(step) = rule.strip_prefix('+') {
            out.step = step.trim().parse().ok();
            return out;
        }
        let (int_part, dec_part) = match rule.split_once('.') {
            Some((i, d)) => (i, Some(d)),
            None => (rule, None),
        };
        if let Some((min, max)) = parse_range(int_part) {
            out.min = Some(min);
            out.max = max;
        }
        if let Some((dmin, dmax)) = dec_part.and_then(parse_range) {
            out.dmin = u32::try_from(dmin).ok();
            out.dmax = dmax.and_then(|d| u32::try_from(d).ok());
        }
        out
    }

    /// `min-max` draws from the range, a bare `count` is used as-is.
    fn count(&self, rng: &mut StdRng) -> Option<i64> {
        match (self.min, self.max) {
            (Some(min), Some(max)) => Some(between(rng, min, max)),
            (Some(min), None) => Some(min),
            _ => None,
        }
    }
}

/// `"3"` -> `(3, None)`, `"1-10"` -> `(1, Some(10))`, `"-5--1"` -> `(-5, Some(-1))`.
fn parse_range(s: &str) -> Option<(i64, Option<i64>)> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let split = s.char_indices().skip(1).find(|&(_, c)| c == '-');
    match split {
        Some((i, _)) => Some((s[..i].trim().parse().ok()?, Some(s[i + 1..].trim().parse().ok()?))),
        None => Some((s.parse().ok()?, None)),
    }
}

fn between(rng: &mut StdRng, a: i64, b: i64) -> i64 {
    rng.gen_range(a.min(b)..=a.max(b))
}

fn clamp_count(n: i64) -> usize {
    usize::try_from(n.max(0)).map_or(MAX_REPEAT, |n| n.min(MAX_REPEAT))
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

// ============================================================================
// Expansion
// ============================================================================

struct Context<'a> {
    rng: &'a mut StdRng,
    increment: &'a AtomicI64,
    /// Per-key state for `|+step` rules, reset on every `generate` call.
    counters: HashMap<String, i64>,
    /// Repetitions still allowed before output is cut short.
    budget: usize,
}

impl Context<'_> {
    fn value(&mut self, value: &Value) -> Value {
        match value {
            Value::Object(map) => self.object(map),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.value(v)).collect()),
            Value::String(s) => self.string(s),
            other => other.clone(),
        }
    }

    fn object(&mut self, map: &Map<String, Value>) -> Value {
        let mut out = Map::new();
        for (key, value) in map {
            let generated = match key.split_once('|') {
                Some((name, rule)) => {
                    let rule = KeyRule::parse(rule);
                    (name, self.apply_rule(key, &rule, value))
                }
                None => (key.as_str(), self.value(value)),
            };
            out.insert(generated.0.to_string(), generated.1);
        }
        Value::Object(out)
    }

    /// Spend up to `n` from the budget, returning how much was granted.
    fn take(&mut self, n: usize) -> usize {
        let granted = n.min(self.budget);
        self.budget -= granted;
        granted
    }

    fn next_counter(&mut self, key: &str) -> i64 {
        let counter = self.counters.entry(key.to_string()).or_insert(0);
        let current = *counter;
        *counter = counter.saturating_add(1);
        current
    }

    fn apply_rule(&mut self, key: &str, rule: &KeyRule, value: &Value) -> Value {
        match value {
            Value::String(s) => {
                let times = clamp_count(rule.count(self.rng).unwrap_or(1));
                let times = self.take(times);
                self.string(&s.repeat(times))
            }
            Value::Number(n) => self.number_rule(key, rule, n),
            Value::Bool(b) => {
                let keep = match (rule.min, rule.max) {
                    (Some(min), Some(max)) if min >= 0 && max >= 0 && (min > 0 || max > 0) => {
                        min as f64 / (min as f64 + max as f64)
                    }
                    _ => 0.5,
                };
                Value::Bool(if self.rng.gen_bool(keep) { *b } else { !*b })
            }
            Value::Object(map) => match rule.count(self.rng) {
                Some(n) => {
                    let keys: Vec<&String> = map.keys().collect();
                    let n = clamp_count(n).min(keys.len());
                    let chosen: Map<String, Value> = keys
                        .choose_multiple(self.rng, n)
                        .map(|k| ((*k).clone(), map[k.as_str()].clone()))
                        .collect();
                    self.object(&chosen)
                }
                None => self.object(map),
            },
            Value::Array(items) => self.array_rule(key, rule, items),
            Value::Null => Value::Null,
        }
    }

    fn number_rule(&mut self, key: &str, rule: &KeyRule, n: &Number) -> Value {
        if let Some(step) = rule.step {
            let k = self.next_counter(key);
            return match n.as_i64() {
                Some(base) => Value::from(
                    step.checked_mul(k)
                        .and_then(|offset| base.checked_add(offset))
                        .unwrap_or(base),
                ),
                None => float_value(n.as_f64().unwrap_or(0.0) + step as f64 * k as f64),
            };
        }
        let Some(int_part) = rule.count(self.rng) else {
            return Value::Number(n.clone());
        };
        let dmin = match rule.dmin {
            Some(d) => d,
            None => return Value::from(int_part),
        };
        let dmax = rule.dmax.unwrap_or(dmin);
        let digits = self
            .rng
            .gen_range(dmin.min(dmax)..=dmin.max(dmax))
            .min(MAX_DECIMALS);
        self.decimal(int_part, digits)
    }

    /// `int_part` with `digits` random decimals, the last one never `0`.
    fn decimal(&mut self, int_part: i64, digits: u32) -> Value {
        if digits == 0 {
            return Value::from(int_part);
        }
        let mut text = format!("{int_part}.");
        for i in 0..digits {
            let digit = if i + 1 == digits {
                self.rng.gen_range(1..=9)
            } else {
                self.rng.gen_range(0..=9)
            };
            text.push(char::from(b'0' + digit as u8));
        }
        text.parse::<f64>().map_or(Value::Null, float_value)
    }

    fn array_rule(&mut self, key: &str, rule: &KeyRule, items: &[Value]) -> Value {
        if items.is_empty() {
            return Value::Array(Vec::new());
        }
        if let Some(step) = rule.step {
            let k = self.next_counter(key);
            let index = (i128::from(k) * i128::from(step)).rem_euclid(items.len() as i128) as usize;
            return self.value(&items[index]);
        }
        if rule.min == Some(1) && rule.max.is_none() {
            let index = self.rng.gen_range(0..items.len());
            return self.value(&items[index]);
        }
        match rule.count(self.rng) {
            Some(n) => {
                let mut out = Vec::new();
                'repeat: for _ in 0..clamp_count(n) {
                    for item in items {
                        if self.take(1) == 0 {
                            break 'repeat;
                        }
                        out.push(self.value(item));
                    }
                }
                Value::Array(out)
            }
            None => Value::Array(items.iter().map(|v| self.value(v)).collect()),
        }
    }

    fn string(&mut self, s: &str) -> Value {
        let tokens = tokenize(s);
        if let [Token::Placeholder { name, args, raw }] = tokens.as_slice() {
            return self
                .placeholder(name, args)
                .unwrap_or_else(|| Value::String(raw.to_string()));
        }
        let mut out = String::with_capacity(s.len());
        for token in &tokens {
            match token {
                Token::Text(text) => out.push_str(text),
                Token::Placeholder { name, args, raw } => match self.placeholder(name, args) {
                    Some(Value::String(s)) => out.push_str(&s),
                    Some(other) => out.push_str(&other.to_string()),
                    None => out.push_str(raw),
                },
            }
        }
        Value::String(out)
    }
}

// ============================================================================
// Placeholders
// ============================================================================

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Text(String),
    Placeholder {
        name: &'a str,
        args: Vec<&'a str>,
        raw: &'a str,
    },
}

fn tokenize(s: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut i = 0;
    while i < s.len() {
        let rest = &s[i..];
        if rest.starts_with("\\@") {
            text.push('@');
            i += 2;
            continue;
        }
        if rest.starts_with('@') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
            let name_len = rest[1..]
                .bytes()
                .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
                .count();
            let name = &rest[1..1 + name_len];
            let mut end = 1 + name_len;
            let mut args = Vec::new();
            if rest[end..].starts_with('(') {
                if let Some(close) = rest[end..].find(')') {
                    args = split_args(&rest[end + 1..end + close]);
                    end += close + 1;
                }
            }
            if !text.is_empty() {
                tokens.push(Token::Text(std::mem::take(&mut text)));
            }
            tokens.push(Token::Placeholder {
                name,
                args,
                raw: &rest[..end],
            });
            i += end;
            continue;
        }
        match rest.chars().next() {
            Some(ch) => {
                text.push(ch);
                i += ch.len_utf8();
            }
            None => break,
        }
    }
    if !text.is_empty() {
        tokens.push(Token::Text(text));
    }
    tokens
}

fn split_args(inner: &str) -> Vec<&str> {
    if inner.trim().is_empty() {
        return Vec::new();
    }
    inner
        .split(',')
        .map(|a| a.trim().trim_matches(|c| c == '"' || c == '\''))
        .collect()
}

fn arg_i64(args: &[&str], index: usize) -> Option<i64> {
    args.get(index).and_then(|a| a.parse().ok())
}

fn arg_u32(args: &[&str], index: usize) -> Option<u32> {
    args.get(index).and_then(|a| a.parse().ok())
}

impl Context<'_> {
    fn pick<'w>(&mut self, words: &[&'w str]) -> &'w str {
        words.choose(self.rng).copied().unwrap_or_default()
    }

    /// Length from `(len)` or `(min,max)` args, else drawn from the default range.
    fn length(&mut self, args: &[&str], default_min: i64, default_max: i64) -> usize {
        let n = match (arg_i64(args, 0), arg_i64(args, 1)) {
            (Some(min), Some(max)) => between(self.rng, min, max),
            (Some(len), None) => len,
            _ => between(self.rng, default_min, default_max),
        };
        let n = clamp_count(n);
        self.take(n)
    }

    fn placeholder(&mut self, name: &str, args: &[&str]) -> Option<Value> {
        let value = match name.to_ascii_lowercase().as_str() {
            "first" => Value::from(self.pick(FIRST_NAMES)),
            "last" => Value::from(self.pick(LAST_NAMES)),
            "name" => {
                let first = self.pick(FIRST_NAMES);
                let last = self.pick(LAST_NAMES);
                Value::from(format!("{first} {last}"))
            }
            "cfirst" => Value::from(self.pick(CHINESE_SURNAMES)),
            "clast" => Value::from(self.pick(CHINESE_GIVEN_NAMES)),
            "cname" => {
                let surname = self.pick(CHINESE_SURNAMES);
                let given = self.pick(CHINESE_GIVEN_NAMES);
                Value::from(format!("{surname}{given}"))
            }
            "id" => Value::from(self.id_card()),
            "guid" | "uuid" => {
                let bytes: [u8; 16] = self.rng.r#gen();
                Value::from(uuid::Builder::from_random_bytes(bytes).into_uuid().to_string())
            }
            "integer" | "int" => {
                let min = arg_i64(args, 0).unwrap_or(-MAX_SAFE_INTEGER);
                let max = arg_i64(args, 1).unwrap_or(MAX_SAFE_INTEGER);
                Value::from(between(self.rng, min, max))
            }
            "natural" => {
                let min = arg_i64(args, 0).unwrap_or(0).max(0);
                let max = arg_i64(args, 1).unwrap_or(MAX_SAFE_INTEGER).max(0);
                Value::from(between(self.rng, min, max))
            }
            "float" => {
                let min = arg_i64(args, 0).unwrap_or(-MAX_SAFE_INTEGER);
                let max = arg_i64(args, 1).unwrap_or(MAX_SAFE_INTEGER);
                let dmin = arg_u32(args, 2).unwrap_or(0);
                let dmax = arg_u32(args, 3).unwrap_or(MAX_DECIMALS).max(dmin);
                let int_part = between(self.rng, min, max);
                let digits = self.rng.gen_range(dmin..=dmax).min(MAX_DECIMALS);
                self.decimal(int_part, digits)
            }
            "boolean" | "bool" => Value::Bool(self.rng.gen_bool(0.5)),
            "date" => Value::from(self.random_datetime(args.first().copied(), "yyyy-MM-dd")),
            "time" => Value::from(self.random_datetime(args.first().copied(), "HH:mm:ss")),
            "datetime" => Value::from(
                self.random_datetime(args.first().copied(), "yyyy-MM-dd HH:mm:ss"),
            ),
            "now" => {
                let format = args
                    .iter()
                    .rev()
                    .find(|a| !TIME_UNITS.contains(a))
                    .copied()
                    .unwrap_or("yyyy-MM-dd HH:mm:ss");
                Value::from(format_date(&chrono::Local::now().naive_local(), format))
            }
            "word" => Value::from(self.word(args)),
            "cword" => {
                let len = self.length(args, 1, 1);
                Value::from(self.cwords(len))
            }
            "title" => {
                let count = self.length(args, 3, 7);
                let words: Vec<String> = (0..count).map(|_| capitalize(&self.word(&[]))).collect();
                Value::from(words.join(" "))
            }
            "ctitle" => {
                let len = self.length(args, 3, 7);
                Value::from(self.cwords(len))
            }
            "sentence" => Value::from(self.sentence(args)),
            "csentence" => Value::from(self.csentence(args)),
            "paragraph" => {
                let count = self.length(args, 3, 7);
                let sentences: Vec<String> = (0..count).map(|_| self.sentence(&[])).collect();
                Value::from(sentences.join(" "))
            }
            "cparagraph" => {
                let count = self.length(args, 3, 7);
                let sentences: String = (0..count).map(|_| self.csentence(&[])).collect();
                Value::from(sentences)
            }
            "email" => {
                let user = self.word(&[]);
                let domain = self.word(&[]);
                let tld = self.pick(TLDS);
                Value::from(format!("{user}@{domain}.{tld}"))
            }
            "url" => {
                let scheme = self.pick(&["http", "https"]);
                let host = self.word(&[]);
                let tld = self.pick(TLDS);
                let path = self.word(&[]);
                Value::from(format!("{scheme}://{host}.{tld}/{path}"))
            }
            "domain" => {
                let host = self.word(&[]);
                let tld = self.pick(TLDS);
                Value::from(format!("{host}.{tld}"))
            }
            "ip" => {
                let octets: [u8; 4] = self.rng.r#gen();
                Value::from(format!(
                    "{}.{}.{}.{}",
                    octets[0], octets[1], octets[2], octets[3]
                ))
            }
            "province" => Value::from(self.pick(PROVINCES).split(' ').next().unwrap_or_default()),
            "city" => {
                let entry = self.pick(PROVINCES);
                let (province, cities) = entry.split_once(' ').unwrap_or((entry, entry));
                let cities: Vec<&str> = cities.split(',').collect();
                let city = self.pick(&cities);
                if args.first() == Some(&"true") {
                    Value::from(format!("{province} {city}"))
                } else {
                    Value::from(city)
                }
            }
            "color" => {
                let rgb: [u8; 3] = self.rng.r#gen();
                Value::from(format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2]))
            }
            "string" => {
                let len = self.length(args, 3, 7);
                let s: String = (0..len)
                    .map(|_| char::from(self.rng.sample(rand::distributions::Alphanumeric)))
                    .collect();
                Value::from(s)
            }
            "increment" => {
                let step = arg_i64(args, 0).unwrap_or(1);
                let previous = self.increment.fetch_add(step, Ordering::Relaxed);
                Value::from(previous.wrapping_add(step))
            }
            _ => return None,
        };
        Some(value)
    }

    fn word(&mut self, args: &[&str]) -> String {
        let len = self.length(args, 3, 10);
        (0..len)
            .map(|_| char::from(self.rng.gen_range(b'a'..=b'z')))
            .collect()
    }

    fn cwords(&mut self, len: usize) -> String {
        let pool: Vec<char> = CHINESE_CHARS.chars().collect();
        (0..len)
            .filter_map(|_| pool.choose(self.rng).copied())
            .collect()
    }

    fn sentence(&mut self, args: &[&str]) -> String {
        let count = self.length(args, 12, 18);
        let words: Vec<String> = (0..count).map(|_| self.word(&[])).collect();
        format!("{}.", capitalize(&words.join(" ")))
    }

    fn csentence(&mut self, args: &[&str]) -> String {
        let len = self.length(args, 12, 18);
        format!("{}。", self.cwords(len))
    }

    fn random_datetime(&mut self, format: Option<&str>, default_format: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        let secs = self.rng.gen_range(0..=now.max(0));
        let dt = chrono::DateTime::from_timestamp(secs, 0)
            .map(|d| d.naive_utc())
            .unwrap_or_else(|| chrono::Utc::now().naive_utc());
        format_date(&dt, format.unwrap_or(default_format))
    }

    /// 18-digit resident identity number with a valid check digit.
    fn id_card(&mut self) -> String {
        const WEIGHTS: [u32; 17] = [7, 9, 10, 5, 8, 4, 2, 1, 6, 3, 7, 9, 10, 5, 8, 4, 2];
        const CHECK: &[u8; 11] = b"10X98765432";

        let region = self.pick(REGION_CODES);
        // 1950-01-01 .. 2005-01-01
        let secs = self.rng.gen_range(-631_152_000..=1_104_537_600);
        let birth = chrono::DateTime::from_timestamp(secs, 0)
            .map(|d| d.format("%Y%m%d").to_string())
            .unwrap_or_else(|| "19900101".to_string());
        let seq = self.rng.gen_range(0..1000);
        let body = format!("{region}{birth}{seq:03}");
        let sum: u32 = body
            .bytes()
            .zip(WEIGHTS)
            .map(|(b, w)| u32::from(b - b'0') * w)
            .sum();
        let check = char::from(CHECK[(sum % 11) as usize]);
        format!("{body}{check}")
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

const TIME_UNITS: &[&str] = &["year", "month", "week", "day", "hour", "minute", "second"];

/// Render `dt` with Mock.js date tokens (`yyyy`, `MM`, `dd`, `HH`, `mm`, `ss`, ...).
fn format_date(dt: &NaiveDateTime, format: &str) -> String {
    let hour12 = match dt.hour() % 12 {
        0 => 12,
        h => h,
    };
    let am_pm = if dt.hour() < 12 { "AM" } else { "PM" };
    let tokens: [(&str, String); 17] = [
        ("yyyy", format!("{:04}", dt.year())),
        ("yy", format!("{:02}", dt.year().rem_euclid(100))),
        ("MM", format!("{:02}", dt.month())),
        ("dd", format!("{:02}", dt.day())),
        ("HH", format!("{:02}", dt.hour())),
        ("hh", format!("{hour12:02}")),
        ("mm", format!("{:02}", dt.minute())),
        ("ss", format!("{:02}", dt.second())),
        ("SS", format!("{:03}", dt.nanosecond() / 1_000_000)),
        ("M", dt.month().to_string()),
        ("d", dt.day().to_string()),
        ("H", dt.hour().to_string()),
        ("h", hour12.to_string()),
        ("m", dt.minute().to_string()),
        ("s", dt.second().to_string()),
        ("A", am_pm.to_string()),
        ("a", am_pm.to_ascii_lowercase()),
    ];

    let mut out = String::with_capacity(format.len() + 8);
    let mut rest = format;
    'outer: while !rest.is_empty() {
        for (token, value) in &tokens {
            if let Some(after) = rest.strip_prefix(token) {
                out.push_str(value);
                rest = after;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(ch) = chars.next() {
            out.push(ch);
        }
        rest = chars.as_str();
    }
    out
}

// ============================================================================
// Word pools
// ============================================================================

static FIRST_NAMES: &[&str] = &[
    "James", "John", "Robert", "Michael", "William", "David", "Richard", "Joseph", "Charles",
    "Thomas", "Mary", "Patricia", "Linda", "Barbara", "Elizabeth", "Jennifer", "Maria", "Susan",
    "Margaret", "Dorothy", "Lisa", "Nancy", "Karen", "Betty", "Helen", "Sandra", "Donna",
];

static LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Miller", "Davis", "Garcia", "Rodriguez",
    "Wilson", "Martinez", "Anderson", "Taylor", "Thomas", "Hernandez", "Moore", "Martin",
    "Jackson", "Thompson", "White", "Lopez", "Lee", "Gonzalez", "Harris", "Clark", "Lewis",
];

static CHINESE_SURNAMES: &[&str] = &[
    "王", "李", "张", "刘", "陈", "杨", "赵", "黄", "周", "吴", "徐", "孙", "胡", "朱", "高",
    "林", "何", "郭", "马", "罗", "梁", "宋", "郑", "谢", "韩", "唐", "冯", "于", "董", "萧",
];

static CHINESE_GIVEN_NAMES: &[&str] = &[
    "伟", "芳", "娜", "秀英", "敏", "静", "丽", "强", "磊", "军", "洋", "勇", "艳", "杰", "娟",
    "涛", "明", "超", "秀兰", "霞", "平", "刚", "桂英", "子涵", "浩然", "雨桐", "欣怡", "梓萱",
];

static CHINESE_CHARS: &str = "的一是在不了有和人这中大为上个国我以要他时来用们生到作地于出就分对成会可主发年动同工也能下过子说产种面而方后多定行学法所民得经十三之进着等部度家电力里如水化高自二理起小物现实加量都两体制机当使点从业本去把性好应开它合还因由其些然前外天政四日那社义事平形相全表间样与关各重新线内数正心反你明看原又么利比或但质气第向道命此变条只没结解问意建月公无系军很情者最立代想已通并提直题党程展五果料象员革位入常文总次品式活设及管特件长求老头基资边流路级少图山统接知较将组见计别她手角期根论运农指几九区强放决西被干做必战先回则任取据处队南给色光门即保治北造百规热领七海口东导器压志世金增争济阶油思术极交受联什认六共权收证改清己美再采转更单风切打白教速花带安场身车例真务具万每目至达走积示议声报斗完类八离华名确才科张信马节话米整空元况今集温传土许步群广石记需段研界拉林律叫且究观越织装影算低持音众书布复容儿须际商非验连断深难近矿千周委素技备半办青省列习响约支般史感劳便团往酸历市克何除消构府称太准精值号率族维划选标写存候毛亲快效斯院查江型眼王按格养易置派层片始却专状育厂京识适属圆包火住调满县局照参红细引听该铁价严";

static PROVINCES: &[&str] = &[
    "北京市 北京市",
    "上海市 上海市",
    "广东省 广州市,深圳市,珠海市,佛山市,东莞市",
    "浙江省 杭州市,宁波市,温州市,绍兴市",
    "江苏省 南京市,苏州市,无锡市,常州市",
    "四川省 成都市,绵阳市,宜宾市",
    "湖北省 武汉市,宜昌市,襄阳市",
    "山东省 济南市,青岛市,烟台市",
    "福建省 福州市,厦门市,泉州市",
    "陕西省 西安市,宝鸡市,咸阳市",
];

static REGION_CODES: &[&str] = &["110101", "310101", "440103", "330102", "320102", "510104"];

static TLDS: &[&str] = &["com", "net", "org", "io", "dev", "cn"];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn generate(template: Value) -> Value {
        TemplateGenerator::seeded(42).generate(&template)
    }

    #[test]
    fn test_parse_key_rules() {
        assert_eq!(
            KeyRule::parse("1-10"),
            KeyRule {
                min: Some(1),
                max: Some(10),
                ..Default::default()
            }
        );
        assert_eq!(KeyRule::parse("+2").step, Some(2));
        let rule = KeyRule::parse("1-100.1-3");
        assert_eq!((rule.dmin, rule.dmax), (Some(1), Some(3)));
        assert_eq!(parse_range("-5--1"), Some((-5, Some(-1))));
        assert_eq!(parse_range("abc"), None);
    }

    #[test]
    fn test_seeded_generators_agree() {
        let template = json!({
            "list|5": [{"id|+1": 1, "name": "@name", "score|1-100": 0, "tag|1": ["a", "b", "c"]}],
            "token": "@guid"
        });
        let a = TemplateGenerator::seeded(7).generate(&template);
        let b = TemplateGenerator::seeded(7).generate(&template);
        assert_eq!(a, b);
    }

    #[test]
    fn test_array_range_and_increment() {
        let out = generate(json!({"list|3-6": [{"id|+1": 1}]}));
        let list = out["list"].as_array().unwrap();
        assert!((3..=6).contains(&list.len()), "{}", list.len());
        let ids: Vec<i64> = list.iter().map(|v| v["id"].as_i64().unwrap()).collect();
        let expected: Vec<i64> = (1..=list.len() as i64).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_array_count_repeats_items() {
        let out = generate(json!({"pair|2": ["x", "y"]}));
        assert_eq!(out["pair"], json!(["x", "y", "x", "y"]));
    }

    #[test]
    fn test_array_pick_one() {
        let out = generate(json!({"color|1": ["red", "green", "blue"]}));
        assert!(["red", "green", "blue"].contains(&out["color"].as_str().unwrap()));
    }

    #[test]
    fn test_array_sequential_pick() {
        let out = generate(json!({"rows|4": [{"day|+1": ["mon", "tue"]}]}));
        let days: Vec<&str> = out["rows"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["day"].as_str().unwrap())
            .collect();
        assert_eq!(days, vec!["mon", "tue", "mon", "tue"]);
    }

    #[test]
    fn test_number_ranges_and_decimals() {
        for seed in 0..20 {
            let out = TemplateGenerator::seeded(seed)
                .generate(&json!({"age|18-60": 0, "price|1-10.2": 0}));
            let age = out["age"].as_i64().unwrap();
            assert!((18..=60).contains(&age));
            let price = out["price"].as_f64().unwrap();
            assert!((1.0..11.0).contains(&price));
            let text = price.to_string();
            let decimals = text.split('.').nth(1).map_or(0, str::len);
            assert_eq!(decimals, 2, "{text}");
        }
    }

    #[test]
    fn test_string_repeat() {
        let out = generate(json!({"stars|3": "*", "dash|2-2": "-"}));
        assert_eq!(out["stars"], "***");
        assert_eq!(out["dash"], "--");
    }

    #[test]
    fn test_object_property_pick() {
        let out = generate(json!({"pick|2": {"a": 1, "b": 2, "c": 3}}));
        assert_eq!(out["pick"].as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_boolean_rule_keeps_type() {
        let out = generate(json!({"flag|1": true}));
        assert!(out["flag"].is_boolean());
    }

    #[test]
    fn test_single_placeholder_is_typed() {
        let out = generate(json!({"n": "@integer(5, 5)", "b": "@boolean", "f": "@float(1,1,2,2)"}));
        assert_eq!(out["n"], json!(5));
        assert!(out["b"].is_boolean());
        let f = out["f"].as_f64().unwrap();
        assert!((1.0..2.0).contains(&f));
    }

    #[test]
    fn test_textual_substitution() {
        let out = generate(json!("Hello @first, you are @natural(30,30)!"));
        let s = out.as_str().unwrap();
        assert!(s.starts_with("Hello "));
        assert!(s.ends_with(", you are 30!"));
        assert!(!s.contains('@'));
    }

    #[test]
    fn test_unknown_placeholder_left_verbatim() {
        assert_eq!(generate(json!("@nosuchthing(1,2)")), json!("@nosuchthing(1,2)"));
        assert_eq!(generate(json!("mail me at a@b")), json!("mail me at a@b"));
        assert_eq!(generate(json!("\\@name")), json!("@name"));
    }

    #[test]
    fn test_date_formats() {
        let out = generate(json!({"d": "@date", "t": "@time", "custom": "@date(yyyy/MM/dd)"}));
        let d = out["d"].as_str().unwrap();
        assert!(chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").is_ok(), "{d}");
        let t = out["t"].as_str().unwrap();
        assert!(chrono::NaiveTime::parse_from_str(t, "%H:%M:%S").is_ok(), "{t}");
        let custom = out["custom"].as_str().unwrap();
        assert!(chrono::NaiveDate::parse_from_str(custom, "%Y/%m/%d").is_ok(), "{custom}");
    }

    #[test]
    fn test_format_date_tokens() {
        let dt = chrono::NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(15, 4, 9)
            .unwrap();
        assert_eq!(format_date(&dt, "yyyy-MM-dd HH:mm:ss"), "2024-03-07 15:04:09");
        assert_eq!(format_date(&dt, "yy M d h A"), "24 3 7 3 PM");
    }

    #[test]
    fn test_guid_and_id_card() {
        let out = generate(json!({"g": "@guid", "id": "@id"}));
        assert!(uuid::Uuid::parse_str(out["g"].as_str().unwrap()).is_ok());

        let id = out["id"].as_str().unwrap();
        assert_eq!(id.len(), 18);
        const WEIGHTS: [u32; 17] = [7, 9, 10, 5, 8, 4, 2, 1, 6, 3, 7, 9, 10, 5, 8, 4, 2];
        let sum: u32 = id[..17]
            .bytes()
            .zip(WEIGHTS)
            .map(|(b, w)| u32::from(b - b'0') * w)
            .sum();
        let expected = b"10X98765432"[(sum % 11) as usize];
        assert_eq!(id.as_bytes()[17], expected);
    }

    #[test]
    fn test_increment_persists_across_calls() {
        let generator = TemplateGenerator::seeded(1);
        assert_eq!(generator.generate(&json!("@increment")), json!(1));
        assert_eq!(generator.generate(&json!("@increment")), json!(2));
        assert_eq!(generator.generate(&json!("@increment(10)")), json!(12));
    }

    #[test]
    fn test_misc_placeholders() {
        let out = generate(json!({
            "email": "@email",
            "url": "@url",
            "ip": "@ip",
            "color": "@color",
            "s": "@string(6)",
            "cname": "@cname",
            "city": "@city(true)",
            "title": "@ctitle(4)"
        }));
        assert!(out["email"].as_str().unwrap().contains('@'));
        assert!(out["url"].as_str().unwrap().starts_with("http"));
        assert_eq!(out["ip"].as_str().unwrap().split('.').count(), 4);
        assert_eq!(out["color"].as_str().unwrap().len(), 7);
        assert_eq!(out["s"].as_str().unwrap().len(), 6);
        assert!(out["cname"].as_str().unwrap().chars().count() >= 2);
        assert!(out["city"].as_str().unwrap().contains(' '));
        assert_eq!(out["title"].as_str().unwrap().chars().count(), 4);
    }

    #[test]
    fn test_non_template_values_pass_through() {
        let template = json!({"a": 1, "b": [true, null], "c": {"d": "plain"}});
        assert_eq!(generate(template.clone()), template);
    }

    #[test]
    fn test_huge_string_repeat_is_clamped() {
        let out = generate(json!({"x|9000000000000000000": "ab"}));
        assert_eq!(out["x"].as_str().unwrap().len(), 2 * MAX_REPEAT);
    }

    #[test]
    fn test_huge_array_range_is_clamped() {
        let out = generate(json!({"list|100000000000-100000000001": [1]}));
        assert_eq!(out["list"].as_array().unwrap().len(), MAX_REPEAT);
    }

    #[test]
    fn test_nested_repeats_stop_at_budget() {
        let out = generate(json!({"outer|10000": [{"inner|10000": [0]}]}));
        let total: usize = out["outer"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["inner"].as_array().unwrap().len() + 1)
            .sum();
        assert!(total <= MAX_GENERATED_ITEMS);
    }

    #[test]
    fn test_increment_overflow_keeps_base() {
        let out = generate(json!({"list|3": [{"id|+1": i64::MAX}]}));
        let ids: Vec<i64> = out["list"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![i64::MAX; 3]);
    }

    #[test]
    fn test_huge_step_array_pick_does_not_overflow() {
        let out = generate(json!({"list|5": [{"pick|+9223372036854775807": ["a", "b", "c"]}]}));
        assert_eq!(out["list"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_huge_placeholder_lengths_are_clamped() {
        let len = |template: &str| generate(json!(template)).as_str().unwrap().len();
        assert_eq!(len("@string(99999999999)"), MAX_REPEAT);
        assert_eq!(len("@word(99999999999)"), MAX_REPEAT);
        // Paragraph text stops growing once the budget is spent.
        assert!(len("@paragraph(99999999999)") > 0);
    }

    #[test]
    fn test_extreme_boolean_weights() {
        let out = generate(json!({"flag|9223372036854775807-9223372036854775807": true}));
        assert!(out["flag"].is_boolean());
    }
}
