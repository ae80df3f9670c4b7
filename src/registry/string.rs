// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! String methods
//!
//! Indices count Unicode scalar values, not UTF-16 code units.

use base64::{Engine, engine::general_purpose};
use once_cell::sync::Lazy;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use regex::Regex;

use super::{
    CallSite, ExtensionRegistry, MethodDoc, MethodImpl, StringMethod, arg, doc, num_arg,
    opt_num_arg, opt_str_arg, relative_index, str_arg,
};
use crate::error::{ExpressionError, Result};
use crate::model::{Value, value_to_date_time};

/// Characters `encodeURIComponent` leaves alone
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("static pattern")
});
static URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>]+"#).expect("static pattern"));
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("static pattern"));
static DOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9]([A-Za-z0-9\-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,}$")
        .expect("static pattern")
});

const METHODS: &[(&str, StringMethod, MethodDoc)] = &[
    (
        "toUpperCase",
        to_upper_case,
        doc("toUpperCase()", "Convert to upper case", "'abc'.toUpperCase()"),
    ),
    (
        "toLowerCase",
        to_lower_case,
        doc("toLowerCase()", "Convert to lower case", "'ABC'.toLowerCase()"),
    ),
    ("trim", trim, doc("trim()", "Strip surrounding whitespace", "' a '.trim()")),
    (
        "trimStart",
        trim_start,
        doc("trimStart()", "Strip leading whitespace", "' a'.trimStart()"),
    ),
    (
        "trimEnd",
        trim_end,
        doc("trimEnd()", "Strip trailing whitespace", "'a '.trimEnd()"),
    ),
    (
        "includes",
        includes,
        doc("includes(search)", "Whether the text contains search", "'abc'.includes('b')"),
    ),
    (
        "startsWith",
        starts_with,
        doc("startsWith(prefix)", "Whether the text starts with prefix", "'abc'.startsWith('a')"),
    ),
    (
        "endsWith",
        ends_with,
        doc("endsWith(suffix)", "Whether the text ends with suffix", "'abc'.endsWith('c')"),
    ),
    (
        "indexOf",
        index_of,
        doc("indexOf(search)", "Position of the first match or -1", "'abc'.indexOf('c')"),
    ),
    (
        "lastIndexOf",
        last_index_of,
        doc("lastIndexOf(search)", "Position of the last match or -1", "'abca'.lastIndexOf('a')"),
    ),
    (
        "slice",
        slice,
        doc("slice(start, end?)", "Substring; negative indices count from the end", "'hello'.slice(-3)"),
    ),
    (
        "substring",
        substring,
        doc("substring(start, end?)", "Substring between two indices", "'hello'.substring(1, 3)"),
    ),
    (
        "split",
        split,
        doc("split(separator, limit?)", "Split into an array", "'a,b'.split(',')"),
    ),
    (
        "replace",
        replace,
        doc("replace(search, replacement)", "Replace the first occurrence", "'aa'.replace('a', 'b')"),
    ),
    (
        "replaceAll",
        replace_all,
        doc("replaceAll(search, replacement)", "Replace every occurrence", "'aa'.replaceAll('a', 'b')"),
    ),
    (
        "repeat",
        repeat,
        doc("repeat(count)", "Repeat the text count times", "'ab'.repeat(3)"),
    ),
    (
        "padStart",
        pad_start,
        doc("padStart(length, fill?)", "Pad on the left to length", "'5'.padStart(3, '0')"),
    ),
    (
        "padEnd",
        pad_end,
        doc("padEnd(length, fill?)", "Pad on the right to length", "'5'.padEnd(3, '0')"),
    ),
    ("charAt", char_at, doc("charAt(index)", "Character at index", "'abc'.charAt(1)")),
    (
        "at",
        at,
        doc("at(index)", "Character at index; negative counts from the end", "'abc'.at(-1)"),
    ),
    (
        "concat",
        concat,
        doc("concat(...parts)", "Append the arguments", "'a'.concat('b', 'c')"),
    ),
    ("toString", to_string, doc("toString()", "The text itself", "'a'.toString()")),
    (
        "isEmpty",
        is_empty,
        doc("isEmpty()", "Whether the text has no characters", "''.isEmpty()"),
    ),
    (
        "isNotEmpty",
        is_not_empty,
        doc("isNotEmpty()", "Whether the text has characters", "'a'.isNotEmpty()"),
    ),
    (
        "toNumber",
        to_number,
        doc("toNumber()", "Parse as a number", "'42'.toNumber()"),
    ),
    (
        "toInt",
        to_int,
        doc("toInt()", "Parse as an integer, truncating", "'42.9'.toInt()"),
    ),
    (
        "toFloat",
        to_number,
        doc("toFloat()", "Parse as a floating-point number", "'4.2'.toFloat()"),
    ),
    (
        "toBoolean",
        to_boolean,
        doc("toBoolean()", "Interpret true/false, yes/no, on/off, 1/0", "'yes'.toBoolean()"),
    ),
    (
        "toDateTime",
        to_date_time,
        doc("toDateTime()", "Parse as a date-time", "'2024-01-01'.toDateTime()"),
    ),
    (
        "toDate",
        to_date_time,
        doc("toDate()", "Parse as a date-time", "'2024-01-01'.toDate()"),
    ),
    (
        "toTitleCase",
        to_title_case,
        doc("toTitleCase()", "Capitalize every word", "'hello world'.toTitleCase()"),
    ),
    (
        "toSentenceCase",
        to_sentence_case,
        doc("toSentenceCase()", "Capitalize the first letter only", "'hELLO'.toSentenceCase()"),
    ),
    (
        "toSnakeCase",
        to_snake_case,
        doc("toSnakeCase()", "Convert to snake_case", "'Hello World'.toSnakeCase()"),
    ),
    (
        "toCamelCase",
        to_camel_case,
        doc("toCamelCase()", "Convert to camelCase", "'hello world'.toCamelCase()"),
    ),
    (
        "extractEmail",
        extract_email,
        doc("extractEmail()", "First email address in the text", "'mail me@x.io'.extractEmail()"),
    ),
    (
        "extractUrl",
        extract_url,
        doc("extractUrl()", "First http(s) URL in the text", "'see https://x.io'.extractUrl()"),
    ),
    (
        "extractDomain",
        extract_domain,
        doc("extractDomain()", "Domain of a URL or email address", "'https://x.io/a'.extractDomain()"),
    ),
    (
        "isEmail",
        is_email,
        doc("isEmail()", "Whether the text is an email address", "'me@x.io'.isEmail()"),
    ),
    ("isUrl", is_url, doc("isUrl()", "Whether the text is an http(s) URL", "'https://x.io'.isUrl()")),
    (
        "isDomain",
        is_domain,
        doc("isDomain()", "Whether the text is a domain name", "'x.io'.isDomain()"),
    ),
    (
        "isNumeric",
        is_numeric,
        doc("isNumeric()", "Whether the text parses as a finite number", "'1.5'.isNumeric()"),
    ),
    (
        "removeTags",
        remove_tags,
        doc("removeTags()", "Strip HTML/XML tags", "'<b>hi</b>'.removeTags()"),
    ),
    (
        "base64Encode",
        base64_encode,
        doc("base64Encode()", "Encode UTF-8 bytes as base64", "'hi'.base64Encode()"),
    ),
    (
        "base64Decode",
        base64_decode,
        doc("base64Decode()", "Decode base64 into UTF-8 text", "'aGk='.base64Decode()"),
    ),
    (
        "urlEncode",
        url_encode,
        doc("urlEncode()", "Percent-encode as a URI component", "'a b'.urlEncode()"),
    ),
    (
        "urlDecode",
        url_decode,
        doc("urlDecode()", "Decode percent-encoding", "'a%20b'.urlDecode()"),
    ),
    (
        "quote",
        quote,
        doc("quote(mark?)", "Wrap in quotes, escaping inner marks", "'a'.quote()"),
    ),
    (
        "parseJson",
        parse_json,
        doc("parseJson()", "Parse JSON text into a value", "'{\"a\":1}'.parseJson()"),
    ),
];

pub(super) fn register(registry: &mut ExtensionRegistry) {
    for &(name, method, method_doc) in METHODS {
        registry.add(name, MethodImpl::String(method), method_doc);
    }
}

fn string(text: impl Into<String>) -> Result<Value> {
    Ok(Value::String(text.into()))
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the `index`-th character (or the end)
fn byte_offset(s: &str, index: usize) -> usize {
    s.char_indices().nth(index).map_or(s.len(), |(i, _)| i)
}

fn chars_between(s: &str, start: usize, end: usize) -> &str {
    if start >= end {
        return "";
    }
    &s[byte_offset(s, start)..byte_offset(s, end)]
}

fn to_upper_case(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    string(s.to_uppercase())
}

fn to_lower_case(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    string(s.to_lowercase())
}

fn trim(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    string(s.trim())
}

fn trim_start(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    string(s.trim_start())
}

fn trim_end(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    string(s.trim_end())
}

fn includes(_: &mut dyn CallSite, s: &str, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(s.contains(&arg(args, 0).to_js_string())))
}

fn starts_with(_: &mut dyn CallSite, s: &str, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(s.starts_with(&arg(args, 0).to_js_string())))
}

fn ends_with(_: &mut dyn CallSite, s: &str, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(s.ends_with(&arg(args, 0).to_js_string())))
}

fn char_index_of(s: &str, byte: Option<usize>) -> Value {
    match byte {
        Some(b) => Value::from(char_len(&s[..b])),
        None => Value::Number(-1.0),
    }
}

fn index_of(_: &mut dyn CallSite, s: &str, args: &[Value]) -> Result<Value> {
    Ok(char_index_of(s, s.find(&arg(args, 0).to_js_string())))
}

fn last_index_of(_: &mut dyn CallSite, s: &str, args: &[Value]) -> Result<Value> {
    Ok(char_index_of(s, s.rfind(&arg(args, 0).to_js_string())))
}

fn slice(_: &mut dyn CallSite, s: &str, args: &[Value]) -> Result<Value> {
    let len = char_len(s);
    let start = relative_index(opt_num_arg(args, 0).unwrap_or(0.0), len);
    let end = opt_num_arg(args, 1).map_or(len, |e| relative_index(e, len));
    string(chars_between(s, start, end))
}

fn substring(_: &mut dyn CallSite, s: &str, args: &[Value]) -> Result<Value> {
    let len = char_len(s);
    let clamp = |n: f64| {
        if n.is_nan() {
            0
        } else {
            n.clamp(0.0, len as f64) as usize
        }
    };
    let start = clamp(opt_num_arg(args, 0).unwrap_or(0.0));
    let end = opt_num_arg(args, 1).map_or(len, clamp);
    let (start, end) = if start > end { (end, start) } else { (start, end) };
    string(chars_between(s, start, end))
}

fn split(site: &mut dyn CallSite, s: &str, args: &[Value]) -> Result<Value> {
    let limit = opt_num_arg(args, 1).map_or(usize::MAX, |n| n.max(0.0) as usize);
    let parts: Vec<Value> = match arg(args, 0) {
        Value::Undefined => vec![Value::from(s)],
        separator => {
            let separator = separator.to_js_string();
            if separator.is_empty() {
                s.chars().take(limit).map(|c| Value::String(c.to_string())).collect()
            } else {
                s.split(separator.as_str()).take(limit).map(Value::from).collect()
            }
        }
    };
    site.reserve(s.len() + parts.len() * 16)?;
    Ok(Value::Array(parts))
}

fn replace(_: &mut dyn CallSite, s: &str, args: &[Value]) -> Result<Value> {
    let search = str_arg(args, 0, "replace")?;
    let replacement = arg(args, 1).to_js_string();
    string(s.replacen(search, &replacement, 1))
}

fn replace_all(site: &mut dyn CallSite, s: &str, args: &[Value]) -> Result<Value> {
    let search = str_arg(args, 0, "replaceAll")?;
    let replacement = arg(args, 1).to_js_string();
    if search.is_empty() {
        return Err(ExpressionError::invalid_argument(
            "replaceAll",
            "search text must not be empty",
        ));
    }
    let count = s.matches(search).count();
    site.reserve(s.len() + count.saturating_mul(replacement.len()))?;
    string(s.replace(search, &replacement))
}

fn repeat(site: &mut dyn CallSite, s: &str, args: &[Value]) -> Result<Value> {
    let count = num_arg(args, 0, "repeat")?;
    if count < 0.0 || !count.is_finite() {
        return Err(ExpressionError::invalid_argument(
            "repeat",
            format!("Invalid count value: {}", crate::model::format_number(count)),
        ));
    }
    let count = count.trunc() as usize;
    site.reserve(s.len().saturating_mul(count))?;
    string(s.repeat(count))
}

fn padding(site: &mut dyn CallSite, s: &str, args: &[Value], method: &str) -> Result<String> {
    let target = num_arg(args, 0, method)?;
    let fill = opt_str_arg(args, 1, method)?.unwrap_or(" ");
    let len = char_len(s);
    if target.is_nan() || target <= len as f64 || fill.is_empty() {
        return Ok(String::new());
    }
    let missing = (target - len as f64) as usize;
    site.reserve(missing.saturating_mul(4))?;
    Ok(fill.chars().cycle().take(missing).collect())
}

fn pad_start(site: &mut dyn CallSite, s: &str, args: &[Value]) -> Result<Value> {
    let pad = padding(site, s, args, "padStart")?;
    string(pad + s)
}

fn pad_end(site: &mut dyn CallSite, s: &str, args: &[Value]) -> Result<Value> {
    let pad = padding(site, s, args, "padEnd")?;
    string(format!("{s}{pad}"))
}

fn char_at(_: &mut dyn CallSite, s: &str, args: &[Value]) -> Result<Value> {
    let index = opt_num_arg(args, 0).unwrap_or(0.0);
    if index < 0.0 {
        return string("");
    }
    string(s.chars().nth(index as usize).map(String::from).unwrap_or_default())
}

fn at(_: &mut dyn CallSite, s: &str, args: &[Value]) -> Result<Value> {
    let index = opt_num_arg(args, 0).unwrap_or(0.0).trunc();
    let len = char_len(s) as f64;
    let position = if index < 0.0 { len + index } else { index };
    if position < 0.0 || position >= len {
        return Ok(Value::Undefined);
    }
    Ok(s.chars()
        .nth(position as usize)
        .map_or(Value::Undefined, |c| Value::String(c.to_string())))
}

fn concat(site: &mut dyn CallSite, s: &str, args: &[Value]) -> Result<Value> {
    let mut out = s.to_string();
    for part in args {
        out.push_str(&part.to_js_string());
    }
    site.reserve(out.len())?;
    string(out)
}

fn to_string(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    string(s)
}

fn is_empty(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    Ok(Value::Bool(s.is_empty()))
}

fn is_not_empty(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    Ok(Value::Bool(!s.is_empty()))
}

fn to_number(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    Ok(Value::Number(crate::model::value::parse_js_number(s)))
}

fn to_int(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    Ok(Value::Number(
        crate::model::value::parse_js_number(s).trunc(),
    ))
}

fn to_boolean(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    let value = !matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "" | "false" | "0" | "no" | "off"
    );
    Ok(Value::Bool(value))
}

fn to_date_time(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    value_to_date_time(&Value::from(s)).map(Value::DateTime)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn to_title_case(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    let words: Vec<String> = s.split(' ').map(capitalize).collect();
    string(words.join(" "))
}

fn to_sentence_case(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    string(capitalize(s))
}

fn words(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut previous_lower = false;
    for c in s.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            previous_lower = false;
            continue;
        }
        if c.is_uppercase() && previous_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        previous_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn to_snake_case(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    string(words(s).join("_"))
}

fn to_camel_case(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    let mut out = String::new();
    for (i, word) in words(s).iter().enumerate() {
        if i == 0 {
            out.push_str(word);
        } else {
            out.push_str(&capitalize(word));
        }
    }
    string(out)
}

fn first_match(regex: &Regex, s: &str) -> Value {
    regex
        .find(s)
        .map_or(Value::Undefined, |m| Value::from(m.as_str()))
}

fn extract_email(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    Ok(first_match(&EMAIL, s))
}

fn extract_url(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    Ok(first_match(&URL, s))
}

fn extract_domain(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    let trimmed = s.trim();
    if let Some(m) = EMAIL.find(trimmed) {
        if let Some((_, domain)) = m.as_str().split_once('@') {
            return string(domain);
        }
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    Ok(url::Url::parse(&candidate)
        .ok()
        .and_then(|url| url.host_str().map(Value::from))
        .unwrap_or(Value::Undefined))
}

fn is_email(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    let whole = EMAIL
        .find(s)
        .is_some_and(|m| m.start() == 0 && m.end() == s.len());
    Ok(Value::Bool(whole))
}

fn is_url(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    let valid = url::Url::parse(s)
        .is_ok_and(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some());
    Ok(Value::Bool(valid))
}

fn is_domain(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    Ok(Value::Bool(DOMAIN.is_match(s)))
}

fn is_numeric(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    Ok(Value::Bool(
        !s.trim().is_empty() && crate::model::value::parse_js_number(s).is_finite(),
    ))
}

fn remove_tags(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    string(TAG.replace_all(s, ""))
}

fn base64_encode(site: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    site.reserve(s.len() / 3 * 4 + 4)?;
    string(general_purpose::STANDARD.encode(s.as_bytes()))
}

fn base64_decode(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    let bytes = general_purpose::STANDARD
        .decode(s.trim())
        .map_err(|e| ExpressionError::invalid_argument("base64Decode", e.to_string()))?;
    string(String::from_utf8_lossy(&bytes))
}

fn url_encode(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    string(utf8_percent_encode(s, URI_COMPONENT).to_string())
}

fn url_decode(_: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    let decoded = percent_decode_str(s)
        .decode_utf8()
        .map_err(|e| ExpressionError::invalid_argument("urlDecode", e.to_string()))?;
    string(decoded)
}

fn quote(_: &mut dyn CallSite, s: &str, args: &[Value]) -> Result<Value> {
    let mark = opt_str_arg(args, 0, "quote")?.unwrap_or("\"");
    let escaped = s.replace(mark, &format!("\\{mark}"));
    string(format!("{mark}{escaped}{mark}"))
}

fn parse_json(site: &mut dyn CallSite, s: &str, _: &[Value]) -> Result<Value> {
    let json: serde_json::Value = serde_json::from_str(s)
        .map_err(|e| ExpressionError::invalid_argument("parseJson", e.to_string()))?;
    site.reserve(s.len())?;
    Ok(Value::from(json))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{NoCallSite, call};
    use super::super::ExtensionRegistry;
    use crate::error::{ExpressionError, ResourceKind};
    use crate::model::Value;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn s(text: &str) -> Value {
        Value::from(text)
    }

    #[rstest]
    #[case("toUpperCase", vec![], "ABC")]
    #[case("slice", vec![Value::from(-2.0)], "bc")]
    #[case("substring", vec![Value::from(2.0), Value::from(0.0)], "ab")]
    #[case("padStart", vec![Value::from(5.0), s("*")], "**abc")]
    #[case("padEnd", vec![Value::from(4.0)], "abc ")]
    #[case("replace", vec![s("b"), s("x")], "axc")]
    #[case("repeat", vec![Value::from(2.0)], "abcabc")]
    #[case("at", vec![Value::from(-1.0)], "c")]
    #[case("concat", vec![s("-"), Value::from(1.0)], "abc-1")]
    #[case("quote", vec![], "\"abc\"")]
    fn string_methods(#[case] method: &str, #[case] args: Vec<Value>, #[case] expected: &str) {
        assert_eq!(call(s("abc"), method, &args).unwrap(), s(expected));
    }

    #[test]
    fn split_and_index_count_characters() {
        assert_eq!(
            call(s("a,b,c"), "split", &[s(","), Value::from(2.0)]).unwrap(),
            Value::Array(vec![s("a"), s("b")])
        );
        assert_eq!(
            call(s("äbc"), "indexOf", &[s("c")]).unwrap(),
            Value::from(2.0)
        );
        assert_eq!(call(s("abc"), "indexOf", &[s("z")]).unwrap(), Value::from(-1.0));
    }

    #[test]
    fn repeat_is_bounded_by_memory_budget() {
        let registry = ExtensionRegistry::shared();
        let mut site = NoCallSite::default();
        let err = registry
            .invoke(&mut site, &s("A"), "repeat", &[Value::from(1e9)])
            .unwrap_err();
        assert!(matches!(
            err,
            ExpressionError::ResourceLimit {
                kind: ResourceKind::Memory,
                ..
            }
        ));
    }

    #[test]
    fn repeat_rejects_negative_count() {
        let err = call(s("A"), "repeat", &[Value::from(-1.0)]).unwrap_err();
        assert!(matches!(err, ExpressionError::InvalidArgument { .. }));
    }

    #[test]
    fn encodings() {
        assert_eq!(call(s("hi"), "base64Encode", &[]).unwrap(), s("aGk="));
        assert_eq!(call(s("aGk="), "base64Decode", &[]).unwrap(), s("hi"));
        assert_eq!(call(s("a b&c"), "urlEncode", &[]).unwrap(), s("a%20b%26c"));
        assert_eq!(call(s("a%20b"), "urlDecode", &[]).unwrap(), s("a b"));
    }

    #[test]
    fn extraction_helpers() {
        assert_eq!(
            call(s("write to me@example.com today"), "extractEmail", &[]).unwrap(),
            s("me@example.com")
        );
        assert_eq!(
            call(s("https://n8n.io/path"), "extractDomain", &[]).unwrap(),
            s("n8n.io")
        );
        assert_eq!(call(s("no email"), "extractEmail", &[]).unwrap(), Value::Undefined);
        assert_eq!(call(s("https://a.io"), "isUrl", &[]).unwrap(), Value::Bool(true));
        assert_eq!(call(s("a.io"), "isUrl", &[]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn case_conversions() {
        assert_eq!(call(s("hello big world"), "toTitleCase", &[]).unwrap(), s("Hello Big World"));
        assert_eq!(call(s("Hello World"), "toSnakeCase", &[]).unwrap(), s("hello_world"));
        assert_eq!(call(s("helloWorld"), "toSnakeCase", &[]).unwrap(), s("hello_world"));
        assert_eq!(call(s("hello world"), "toCamelCase", &[]).unwrap(), s("helloWorld"));
    }

    #[test]
    fn conversions() {
        assert_eq!(call(s("yes"), "toBoolean", &[]).unwrap(), Value::Bool(true));
        assert_eq!(call(s("off"), "toBoolean", &[]).unwrap(), Value::Bool(false));
        assert_eq!(call(s("42.9"), "toInt", &[]).unwrap(), Value::from(42.0));
        assert!(matches!(
            call(s("nope"), "toDateTime", &[]).unwrap_err(),
            ExpressionError::InvalidDate { .. }
        ));
    }
}
