//! nom helpers for the line templates

use nom::{
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1},
    combinator::{all_consuming, map, map_res, opt, recognize, verify},
    error::VerboseError,
    sequence::{pair, preceded, terminated, tuple},
};

use bdir_api_types::MAX_NAME_LENGTH;

use crate::unbash_spaces;

pub type IResult<I, O, E = VerboseError<I>> = Result<(I, O), nom::Err<E>>;

/// Recognizes zero or more spaces and tabs (but not carage returns or line feeds)
pub fn multispace0(i: &str) -> IResult<&str, &str> {
    take_while(|c| c == ' ' || c == '\t')(i)
}

/// Recognizes one or more spaces and tabs (but not carage returns or line feeds)
pub fn multispace1(i: &str) -> IResult<&str, &str> {
    take_while1(|c| c == ' ' || c == '\t')(i)
}

/// Recognizes one or more non-whitespace-characters
pub fn notspace1(i: &str) -> IResult<&str, &str> {
    take_while1(|c| !(c == ' ' || c == '\t' || c == '\n'))(i)
}

/// Parse a 64 bit unsigned integer
pub fn parse_u64(i: &str) -> IResult<&str, u64> {
    map_res(recognize(digit1), str::parse)(i)
}

/// Parse a 32 bit unsigned integer
pub fn parse_u32(i: &str) -> IResult<&str, u32> {
    map_res(recognize(digit1), str::parse)(i)
}

/// Parse a 64 bit signed integer
pub fn parse_i64(i: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), str::parse)(i)
}

/// Parse a 32 bit signed integer
pub fn parse_i32(i: &str) -> IResult<&str, i32> {
    map_res(recognize(pair(opt(char('-')), digit1)), str::parse)(i)
}

/// Integer flag, anything but zero is true
pub fn parse_flag(i: &str) -> IResult<&str, bool> {
    map(parse_i64, |v| v != 0)(i)
}

/// A (bashed) name, limited to [MAX_NAME_LENGTH] - 1 characters
pub fn parse_name(i: &str) -> IResult<&str, String> {
    map(
        verify(notspace1, |s: &str| s.len() < MAX_NAME_LENGTH),
        unbash_spaces,
    )(i)
}

/// A (bashed) value without length limit, `""` stands for the empty string
pub fn parse_text(i: &str) -> IResult<&str, String> {
    map(notspace1, |s: &str| {
        if s == "\"\"" {
            String::new()
        } else {
            unbash_spaces(s)
        }
    })(i)
}

/// `<spaces>key=<value>`
pub fn field<'a, O, F>(key: &'static str, value: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    preceded(tuple((multispace1, tag(key), char('='))), value)
}

/// `<spaces>word`
pub fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    preceded(multispace1, tag(word))
}

/// Match a complete line (a trailing newline is ignored).
///
/// Returns `None` if the template does not match.
pub fn match_line<'a, O, F>(line: &'a str, parser: F) -> Option<O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    let line = line.trim_end_matches(|c| c == '\n' || c == '\r' || c == '\0');
    all_consuming(terminated(parser, multispace0))(line)
        .ok()
        .map(|(_, data)| data)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fields() {
        let parser = pair(tag("CatReq"), field("JobId", parse_u64));
        assert_eq!(match_line("CatReq JobId=12\n", parser), Some(("CatReq", 12)));

        assert_eq!(match_line("CatReq JobId=x", pair(tag("CatReq"), field("JobId", parse_u64))), None);
        assert_eq!(match_line("CatReq JobId=1 trailing", pair(tag("CatReq"), field("JobId", parse_u64))), None);

        assert_eq!(match_line("-17", parse_i32), Some(-17));
        assert_eq!(match_line("x\x01y", parse_name), Some("x y".to_string()));
        assert_eq!(match_line("\"\"", parse_text), Some(String::new()));
        assert_eq!(match_line(&"a".repeat(MAX_NAME_LENGTH), parse_name), None);
    }
}
