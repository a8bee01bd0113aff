//! Line-oriented textual form of a DCD program.
//!
//! One command per logical line; a trailing `\` continues the command onto
//! the next line. Lines whose first non-whitespace character is `#` are
//! comments. Numeric literals accept `0x`/`0b`/`0o` prefixes, decimal, and
//! classic leading-zero octal (`0755`).
//!
//! Both `WRITE_VALUE` and `WriteValue` spellings are accepted on parse;
//! emission always canonicalizes to the `WriteValue`-style spelling.

use super::{CheckOp, Command, Dcd, DcdError, UnlockEngine, Width, WriteEntry, WriteOp};

fn join_continuations(text: &str) -> Vec<(usize, String)> {
    let mut logical = Vec::new();
    let mut pending = String::new();
    let mut start_line = 0;
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim_end();
        if pending.is_empty() {
            start_line = i + 1;
        }
        if let Some(body) = line.strip_suffix('\\') {
            if !pending.is_empty() {
                pending.push(' ');
            }
            pending.push_str(body.trim_end());
            continue;
        }
        if !pending.is_empty() {
            pending.push(' ');
            pending.push_str(line);
            logical.push((start_line, std::mem::take(&mut pending)));
        } else {
            logical.push((start_line, line.to_string()));
        }
    }
    if !pending.is_empty() {
        logical.push((start_line, pending));
    }
    logical
}

pub(crate) fn parse_number(tok: &str) -> Option<u64> {
    let t = tok.trim();
    if let Some(h) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return u64::from_str_radix(h, 16).ok();
    }
    if let Some(b) = t.strip_prefix("0b").or_else(|| t.strip_prefix("0B")) {
        return u64::from_str_radix(b, 2).ok();
    }
    if let Some(o) = t.strip_prefix("0o").or_else(|| t.strip_prefix("0O")) {
        return u64::from_str_radix(o, 8).ok();
    }
    if t.len() > 1 && t.starts_with('0') && t.bytes().all(|b| b.is_ascii_digit()) {
        return u64::from_str_radix(&t[1..], 8).ok();
    }
    t.parse::<u64>().ok()
}

fn normalize_keyword(tok: &str) -> String {
    tok.chars()
        .filter(|c| *c != '_')
        .collect::<String>()
        .to_ascii_lowercase()
}

pub fn parse(text: &str) -> Result<Dcd, DcdError> {
    let mut dcd = Dcd::new(0x40);
    for (line_no, line) in join_continuations(text) {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        let keyword = normalize_keyword(tokens[0]);
        let cmd = parse_command(&keyword, &tokens[1..], line_no)?;
        dcd.push(cmd);
    }
    Ok(dcd)
}

fn expect_number(tokens: &[&str], idx: usize, line: usize, what: &str) -> Result<u64, DcdError> {
    let tok = tokens.get(idx).ok_or_else(|| DcdError::MalformedText {
        line,
        reason: format!("missing {what}"),
    })?;
    parse_number(tok).ok_or_else(|| DcdError::MalformedText {
        line,
        reason: format!("invalid numeric literal for {what}: {tok}"),
    })
}

fn parse_command(keyword: &str, tokens: &[&str], line: usize) -> Result<Command, DcdError> {
    let write_op = match keyword {
        "writevalue" => Some(WriteOp::WriteValue),
        "writeclear" => Some(WriteOp::WriteClear),
        "clearbitmask" => Some(WriteOp::ClearBitmask),
        "setbitmask" => Some(WriteOp::SetBitmask),
        _ => None,
    };
    if let Some(op) = write_op {
        let width = Width::from_code(expect_number(tokens, 0, line, "width")? as u8)?;
        let addr = expect_number(tokens, 1, line, "address")? as u32;
        let value = expect_number(tokens, 2, line, "value")? as u32;
        return Ok(Command::WriteData {
            op,
            width,
            entries: vec![WriteEntry { addr, value }],
        });
    }

    let check_op = match keyword {
        "checkallclear" => Some(CheckOp::AllClear),
        "checkallset" => Some(CheckOp::AllSet),
        "checkanyclear" => Some(CheckOp::AnyClear),
        "checkanyset" => Some(CheckOp::AnySet),
        _ => None,
    };
    if let Some(op) = check_op {
        let width = Width::from_code(expect_number(tokens, 0, line, "width")? as u8)?;
        let addr = expect_number(tokens, 1, line, "address")? as u32;
        let mask = expect_number(tokens, 2, line, "mask")? as u32;
        let count = match tokens.get(3) {
            Some(tok) => Some(parse_number(tok).ok_or_else(|| DcdError::MalformedText {
                line,
                reason: format!("invalid numeric literal for count: {tok}"),
            })? as u32),
            None => None,
        };
        return Ok(Command::CheckData {
            op,
            width,
            addr,
            mask,
            count,
        });
    }

    if keyword == "nop" {
        return Ok(Command::Nop);
    }

    if keyword == "unlock" {
        let engine_tok = tokens.first().ok_or_else(|| DcdError::MalformedText {
            line,
            reason: "missing unlock engine".to_string(),
        })?;
        let engine: UnlockEngine = engine_tok
            .parse()
            .map_err(|_| DcdError::MalformedText {
                line,
                reason: format!("unknown unlock engine: {engine_tok}"),
            })?;
        let mut values = Vec::new();
        for tok in &tokens[1..] {
            let v = parse_number(tok).ok_or_else(|| DcdError::MalformedText {
                line,
                reason: format!("invalid numeric literal: {tok}"),
            })?;
            values.push(v as u32);
        }
        return Ok(Command::Unlock { engine, values });
    }

    Err(DcdError::MalformedText {
        line,
        reason: format!("unknown command: {keyword}"),
    })
}

fn write_keyword(op: WriteOp) -> &'static str {
    match op {
        WriteOp::WriteValue => "WriteValue",
        WriteOp::WriteClear => "WriteClear",
        WriteOp::ClearBitmask => "ClearBitmask",
        WriteOp::SetBitmask => "SetBitmask",
    }
}

fn check_keyword(op: CheckOp) -> &'static str {
    match op {
        CheckOp::AllClear => "CheckAllClear",
        CheckOp::AllSet => "CheckAllSet",
        CheckOp::AnyClear => "CheckAnyClear",
        CheckOp::AnySet => "CheckAnySet",
    }
}

/// Emit the canonical textual form, one command per line.
pub fn export(dcd: &Dcd) -> String {
    let mut out = String::new();
    for cmd in &dcd.commands {
        match cmd {
            Command::WriteData { op, width, entries } => {
                for e in entries {
                    out.push_str(&format!(
                        "{} {} {:#010x} {:#010x}\n",
                        write_keyword(*op),
                        width.bytes(),
                        e.addr,
                        e.value
                    ));
                }
            }
            Command::CheckData {
                op,
                width,
                addr,
                mask,
                count,
            } => {
                out.push_str(&format!(
                    "{} {} {:#010x} {:#010x}",
                    check_keyword(*op),
                    width.bytes(),
                    addr,
                    mask
                ));
                if let Some(c) = count {
                    out.push_str(&format!(" {c}"));
                }
                out.push('\n');
            }
            Command::Nop => out.push_str("Nop\n"),
            Command::Unlock { engine, values } => {
                out.push_str(&format!("Unlock {engine}"));
                for v in values {
                    out.push_str(&format!(" {v:#010x}"));
                }
                out.push('\n');
            }
        }
    }
    out
}
