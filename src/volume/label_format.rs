//! Label format variable expansion
//!
//! A label format is either a plain volume name prefix or a template with
//! `${Var}` references. A reference may carry a padding modifier,
//! `${Var:p/<width>/<char>/<l|r>}`, where `r` pads on the left (right
//! aligned value) and `l` pads on the right.

use anyhow::{bail, format_err, Error};
use nom::{
    bytes::complete::{tag, take_while1},
    character::complete::{anychar, char, digit1, one_of},
    combinator::{map_res, opt, verify},
    sequence::{delimited, preceded, tuple},
};

use bdir_api_types::{is_volume_name_legal, MAX_NAME_LENGTH};

type IResult<I, O> = nom::IResult<I, O, nom::error::VerboseError<I>>;

/// Values available to label format templates
#[derive(Clone, Debug, Default)]
pub struct LabelContext {
    pub job_id: u64,
    /// Unique job name
    pub job: String,
    pub job_name: String,
    pub pool: String,
    pub client: String,
    pub level: String,
    pub job_type: String,
    pub storage: String,
    pub media_type: String,
    /// Volume count of the pool before the new volume is added
    pub num_vols: u32,
    /// Epoch used for the date and time variables
    pub time: i64,
}

/// Plain label formats are used as prefix for a numbered volume name.
pub fn is_simple_label_format(format: &str) -> bool {
    is_volume_name_legal(format)
}

#[derive(Debug, PartialEq, Eq)]
struct Padding {
    width: usize,
    fill: char,
    left_aligned: bool,
}

#[derive(Debug, PartialEq, Eq)]
struct VarRef<'a> {
    name: &'a str,
    padding: Option<Padding>,
}

fn parse_padding(i: &str) -> IResult<&str, Padding> {
    let (i, (width, _, fill, _, align)) = preceded(
        tag(":p/"),
        tuple((
            verify(map_res(digit1, str::parse::<usize>), |width| *width < MAX_NAME_LENGTH),
            char('/'),
            anychar,
            char('/'),
            one_of("lr"),
        )),
    )(i)?;
    Ok((
        i,
        Padding {
            width,
            fill,
            left_aligned: align == 'l',
        },
    ))
}

fn parse_var_ref(i: &str) -> IResult<&str, VarRef> {
    let (i, (name, padding)) = delimited(
        tag("${"),
        tuple((
            take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_'),
            opt(parse_padding),
        )),
        char('}'),
    )(i)?;
    Ok((i, VarRef { name, padding }))
}

fn strftime(format: &str, time: i64) -> Result<String, Error> {
    proxmox_time::strftime_local(format, time)
}

impl LabelContext {
    fn lookup(&self, name: &str) -> Result<String, Error> {
        Ok(match name {
            "Year" => strftime("%Y", self.time)?,
            "Month" => strftime("%m", self.time)?,
            "Day" => strftime("%d", self.time)?,
            "Hour" => strftime("%H", self.time)?,
            "Minute" => strftime("%M", self.time)?,
            "Second" => strftime("%S", self.time)?,
            "WeekDay" => strftime("%w", self.time)?,
            "JobId" => self.job_id.to_string(),
            "Job" => self.job.clone(),
            "JobName" => self.job_name.clone(),
            "Pool" => self.pool.clone(),
            "Client" => self.client.clone(),
            "Level" => self.level.clone(),
            "Type" => self.job_type.clone(),
            "Storage" => self.storage.clone(),
            "MediaType" => self.media_type.clone(),
            "NumVols" => self.num_vols.to_string(),
            _ => bail!("unknown variable '{}'", name),
        })
    }
}

fn apply_padding(value: String, padding: &Padding) -> String {
    let len = value.chars().count();
    if len >= padding.width {
        return value;
    }
    let fill: String = std::iter::repeat(padding.fill)
        .take(padding.width - len)
        .collect();
    if padding.left_aligned {
        value + &fill
    } else {
        fill + &value
    }
}

/// Expand all variable references in `format`.
pub fn expand_label_format(format: &str, ctx: &LabelContext) -> Result<String, Error> {
    let mut result = String::with_capacity(format.len() + 16);
    let mut rest = format;

    while let Some(pos) = rest.find("${") {
        result.push_str(&rest[..pos]);
        let (next, var) = parse_var_ref(&rest[pos..])
            .map_err(|_| format_err!("bad variable reference in label format '{}'", format))?;

        let value = ctx.lookup(var.name)?;
        match var.padding {
            Some(ref padding) => result.push_str(&apply_padding(value, padding)),
            None => result.push_str(&value),
        }
        rest = next;
    }
    result.push_str(rest);

    Ok(result)
}
