//! `.smx` recipe document grammar.
//!
//! Deserialized straight off `serde_yaml` into this tree; `{{ name }}`
//! substitution then walks the `DATA`/`BODY` string leaves before
//! [`super::interp`] tokenizes and executes `CMDS`.

use std::collections::HashMap;

use serde::Deserialize;

#[derive(thiserror::Error, Debug)]
pub enum RecipeError {
    #[error("unresolved variable {{{{ {0} }}}}")]
    UnresolvedVariable(String),
    #[error("unknown data segment {0:?}")]
    UnknownSegmentRef(String),
    #[error("malformed command on line {line}: {reason}")]
    CmdSyntax { line: usize, reason: String },
    #[error("segment {0:?} has no address and none was given")]
    MissingAddress(String),
    #[error("could not read file {path:?}: {reason}")]
    FileRead { path: String, reason: String },
    #[error("segment {0:?} has no DATA/FILE content")]
    EmptySegment(String),
    #[error("ENVPATCH mark {0:?} not found in the embedded image")]
    EnvRegionNotFound(String),
    #[error("ENVPATCH result ({needed} bytes) does not fit the env region ({available} bytes)")]
    EnvPatchTooLarge { needed: usize, available: usize },
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Dcd(#[from] crate::dcd::DcdError),
    #[error(transparent)]
    Image(#[from] crate::image::ImageError),
    #[error(transparent)]
    Sdp(#[from] crate::sdp::SdpError),
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "UPPERCASE")]
pub struct RecipeFile {
    pub head: Head,
    #[serde(default)]
    pub vars: HashMap<String, String>,
    #[serde(default)]
    pub data: HashMap<String, DataSegment>,
    #[serde(default)]
    pub body: Vec<Recipe>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "UPPERCASE")]
pub struct Head {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    pub chip: String,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SegmentType {
    Dcd,
    Fdt,
    Imx,
    Uri,
    Uei,
    #[default]
    Bin,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum DataField {
    Literal(String),
    Composed(ImxSpec),
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "UPPERCASE")]
pub struct ImxSpec {
    #[serde(default)]
    pub staddr: Option<String>,
    #[serde(default)]
    pub offset: Option<String>,
    pub dcdseg: Option<String>,
    pub appseg: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnvPatchMode {
    #[default]
    Disabled,
    Merge,
    Replace,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "UPPERCASE")]
pub struct EnvPatch {
    #[serde(default)]
    pub mode: EnvPatchMode,
    #[serde(default = "default_mark")]
    pub mark: String,
    #[serde(default)]
    pub eval: String,
}

fn default_mark() -> String {
    "bootdelay=".to_string()
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "UPPERCASE")]
pub struct DataSegment {
    #[serde(rename = "TYPE", default)]
    pub ty: SegmentType,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub addr: Option<String>,
    #[serde(rename = "DATA", default)]
    pub data: Option<DataField>,
    #[serde(rename = "FILE", default)]
    pub file: Option<String>,
    #[serde(rename = "ENVPATCH", default)]
    pub env_patch: Option<EnvPatch>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "UPPERCASE")]
pub struct Recipe {
    pub name: String,
    #[serde(default)]
    pub desc: Option<String>,
    pub cmds: String,
}

impl RecipeFile {
    pub fn parse(yaml: &str) -> Result<Self, RecipeError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Resolve `{{ name }}` references against `VARS` across `DATA` string
    /// leaves and every recipe's `CMDS`; `HEAD` is left untouched — only
    /// `DATA`/`BODY` are substitution targets.
    pub fn substitute(&mut self) -> Result<(), RecipeError> {
        let vars = self.vars.clone();
        for seg in self.data.values_mut() {
            if let Some(desc) = &seg.desc {
                seg.desc = Some(substitute(desc, &vars)?);
            }
            if let Some(addr) = &seg.addr {
                seg.addr = Some(substitute(addr, &vars)?);
            }
            if let Some(DataField::Literal(s)) = &seg.data {
                seg.data = Some(DataField::Literal(substitute(s, &vars)?));
            }
            if let Some(DataField::Composed(spec)) = &seg.data {
                let mut spec = spec.clone();
                if let Some(s) = &spec.staddr {
                    spec.staddr = Some(substitute(s, &vars)?);
                }
                if let Some(s) = &spec.offset {
                    spec.offset = Some(substitute(s, &vars)?);
                }
                spec.dcdseg = spec.dcdseg.map(|s| substitute(&s, &vars)).transpose()?;
                spec.appseg = spec.appseg.map(|s| substitute(&s, &vars)).transpose()?;
                seg.data = Some(DataField::Composed(spec));
            }
            if let Some(file) = &seg.file {
                seg.file = Some(substitute(file, &vars)?);
            }
            if let Some(patch) = &mut seg.env_patch {
                patch.mark = substitute(&patch.mark, &vars)?;
                patch.eval = substitute(&patch.eval, &vars)?;
            }
        }
        for recipe in &mut self.body {
            recipe.cmds = substitute(&recipe.cmds, &vars)?;
        }
        Ok(())
    }
}

/// Single-pass `{{ name }}` substitution: must run before structural
/// interpretation; one pass is sufficient.
pub fn substitute(text: &str, vars: &HashMap<String, String>) -> Result<String, RecipeError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            RecipeError::UnresolvedVariable(after.trim().to_string())
        })?;
        let name = after[..end].trim();
        let value = vars
            .get(name)
            .ok_or_else(|| RecipeError::UnresolvedVariable(name.to_string()))?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_variables() {
        let mut vars = HashMap::new();
        vars.insert("ocram".to_string(), "0x00910000".to_string());
        let out = substitute("WDCD dcd {{ ocram }}", &vars).unwrap();
        assert_eq!(out, "WDCD dcd 0x00910000");
    }

    #[test]
    fn unresolved_variable_is_an_error() {
        let vars = HashMap::new();
        let err = substitute("{{ missing }}", &vars).unwrap_err();
        assert!(matches!(err, RecipeError::UnresolvedVariable(name) if name == "missing"));
    }

    #[test]
    fn parses_a_minimal_document() {
        let yaml = r#"
HEAD:
  NAME: demo
  CHIP: mx7
VARS:
  OCRAM: "0x00910000"
DATA:
  dcd:
    TYPE: DCD
    DATA: "d20000... "
BODY:
  - NAME: boot
    CMDS: |
      WDCD dcd {{ OCRAM }}
"#;
        let mut doc = RecipeFile::parse(yaml).unwrap();
        doc.substitute().unwrap();
        assert_eq!(doc.head.chip, "mx7");
        assert!(doc.body[0].cmds.contains("0x00910000"));
    }
}
