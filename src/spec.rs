//! Director-file loading: `${VAR}` interpolation, schema validation, and
//! conversion into a typed [`Specification`].
//!
//! Two specs (the project's current and next) are compared for equality to
//! decide what needs rebuilding. Equality is structural on the typed model:
//! mapping-valued fields use `HashMap` so key order doesn't matter, sequence
//! fields use `Vec` so document order does.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde_yaml::Value;

use crate::errors::DirectorError;

/// An ordered sequence of single-entry mappings: `options`, `arguments`,
/// `environment`, `volumes`, `start`, and `oci.environment` all take this
/// shape. A `None` value means the mapping's single key had a null/absent
/// value, allowed unless the caller rejects it.
pub type OrderedPairs = Vec<(String, Option<String>)>;

#[derive(Debug, Clone, PartialEq)]
pub struct Specification {
    pub options: OrderedPairs,
    pub default_volume_type: Option<String>,
    pub volumes: HashMap<String, VolumeDef>,
    /// Keyed like a map (membership/equality don't care about order — see
    /// the module doc comment) but iterates in document order, which is the
    /// tie-breaker for same-priority services (spec §5).
    pub services: IndexMap<String, ServiceDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDef {
    pub priority: i64,
    pub name: Option<String>,
    pub makejail: String,
    pub reset_options: bool,
    pub ignore_mtime: bool,
    pub options: OrderedPairs,
    pub arguments: OrderedPairs,
    pub environment: OrderedPairs,
    pub start_environment: OrderedPairs,
    pub oci: Option<OciDef>,
    pub volumes: OrderedPairs,
    pub scripts: Vec<ScriptDef>,
    pub start: OrderedPairs,
    pub serial: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OciDef {
    pub user: Option<String>,
    pub workdir: Option<String>,
    pub environment: OrderedPairs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptType {
    Jexec,
    Local,
    Chroot,
}

impl ScriptType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptType::Jexec => "jexec",
            ScriptType::Local => "local",
            ScriptType::Chroot => "chroot",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "jexec" => Some(ScriptType::Jexec),
            "local" => Some(ScriptType::Local),
            "chroot" => Some(ScriptType::Chroot),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptDef {
    pub shell: String,
    pub script_type: ScriptType,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeDef {
    pub device: String,
    pub volume_type: String,
    pub options: String,
    pub dump: i64,
    pub pass: i64,
    pub umask: Option<String>,
    pub mode: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
}

static VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").unwrap());

static SERVICE_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._-]+$").unwrap());
static JAIL_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9_-]*$").unwrap());

/// Project and service names share the same pattern.
pub fn is_valid_name(name: &str) -> bool {
    SERVICE_NAME_PATTERN.is_match(name)
}

/// Expand `${VAR}` and `${VAR:-default}` references against the process
/// environment. An unset variable with no default expands to the empty
/// string.
pub fn interpolate(text: &str) -> String {
    VAR_PATTERN
        .replace_all(text, |caps: &regex::Captures| {
            let name = &caps[1];
            match std::env::var(name) {
                Ok(value) => value,
                Err(_) => caps.get(3).map(|m| m.as_str()).unwrap_or("").to_string(),
            }
        })
        .into_owned()
}

/// Load and validate a Director file from `path`.
pub fn load(path: &Path) -> anyhow::Result<Specification> {
    let raw = fs::read_to_string(path)?;
    let interpolated = interpolate(&raw);

    let document: Value = serde_yaml::from_str(&interpolated)
        .map_err(|err| DirectorError::InvalidSpec(format!("{}: {err}", path.display())))?;

    Ok(parse_document(&document)?)
}

/// Recognized keys at document scope.
const DOCUMENT_KEYS: &[&str] = &["options", "default_volume_type", "services", "volumes"];
/// Recognized keys at service scope.
const SERVICE_KEYS: &[&str] = &[
    "priority",
    "name",
    "makejail",
    "reset_options",
    "ignore_mtime",
    "options",
    "arguments",
    "environment",
    "start-environment",
    "volumes",
    "oci",
    "scripts",
    "start",
    "serial",
];
/// Recognized keys at volume scope.
const VOLUME_KEYS: &[&str] =
    &["device", "type", "options", "dump", "pass", "umask", "mode", "owner", "group"];
/// Recognized keys on a single script entry.
const SCRIPT_KEYS: &[&str] = &["shell", "type", "text"];

/// Reject any key in `map` not listed in `allowed` (spec §3: unknown
/// top-level keys at document, service, volume, or script scope are
/// rejected).
fn reject_unknown_keys(map: &serde_yaml::Mapping, allowed: &[&str], id: &str) -> Result<(), DirectorError> {
    for key in map.keys() {
        let key_str = coerce_string(key);
        if !allowed.contains(&key_str.as_str()) {
            return Err(DirectorError::InvalidSpec(format!("{id}: Unknown key '{key_str}'.")));
        }
    }

    Ok(())
}

fn parse_document(document: &Value) -> Result<Specification, DirectorError> {
    let map = document
        .as_mapping()
        .ok_or_else(|| DirectorError::InvalidSpec("Invalid document specification.".into()))?;

    reject_unknown_keys(map, DOCUMENT_KEYS, "document")?;

    let options = match map.get("options") {
        Some(v) => parse_pairs(v, "options", true)?,
        None => Vec::new(),
    };

    let default_volume_type = match map.get("default_volume_type") {
        Some(v) => Some(coerce_string(v)),
        None => None,
    };

    let services_value = map
        .get("services")
        .ok_or_else(|| DirectorError::InvalidSpec("services: Required but not defined.".into()))?;
    let services = parse_services(services_value)?;

    let volumes = match map.get("volumes") {
        Some(v) => parse_volumes(v)?,
        None => HashMap::new(),
    };

    Ok(Specification {
        options,
        default_volume_type,
        volumes,
        services,
    })
}

fn parse_services(value: &Value) -> Result<IndexMap<String, ServiceDef>, DirectorError> {
    let map = value
        .as_mapping()
        .ok_or_else(|| DirectorError::InvalidSpec("services: Must be a Mapping.".into()))?;

    let mut services = IndexMap::new();

    for (nro, (key, service_value)) in map.iter().enumerate() {
        let nro = nro + 1;
        let name = coerce_string(key);

        if !SERVICE_NAME_PATTERN.is_match(&name) {
            return Err(DirectorError::InvalidSpec(format!(
                "services ({name} / #{nro}): Service name is incorrect."
            )));
        }

        let service_map = service_value.as_mapping().ok_or_else(|| {
            DirectorError::InvalidSpec(format!("services/{name} (#{nro}): Must be a Mapping."))
        })?;

        let service = parse_service(service_map, &name, nro)?;
        services.insert(name, service);
    }

    Ok(services)
}

fn parse_service(
    map: &serde_yaml::Mapping,
    name: &str,
    nro: usize,
) -> Result<ServiceDef, DirectorError> {
    let id = format!("services/{name}");

    reject_unknown_keys(map, SERVICE_KEYS, &format!("{id} (#{nro})"))?;

    let priority = match map.get("priority") {
        Some(v) => require_int(v, &format!("{id} (priority / #{nro})"))?,
        None => crate::constants::DEFAULT_PRIORITY,
    };

    let jail_name = match map.get("name") {
        Some(v) => {
            let jn = coerce_string(v);
            if !JAIL_NAME_PATTERN.is_match(&jn) {
                return Err(DirectorError::InvalidSpec(format!(
                    "{id} (name / #{nro}): Jail name is incorrect."
                )));
            }
            Some(jn)
        }
        None => None,
    };

    let makejail = match map.get("makejail") {
        Some(v) => coerce_string(v),
        None => crate::constants::DEFAULT_MAKEJAIL.to_string(),
    };

    let reset_options = match map.get("reset_options") {
        Some(v) => require_bool(v, &format!("{id} (reset_options / #{nro})"))?,
        None => false,
    };

    let ignore_mtime = match map.get("ignore_mtime") {
        Some(v) => require_bool(v, &format!("{id} (ignore_mtime / #{nro})"))?,
        None => false,
    };

    let options = match map.get("options") {
        Some(v) => parse_pairs(v, &format!("{id}/options"), true)?,
        None => Vec::new(),
    };

    let arguments = match map.get("arguments") {
        Some(v) => parse_pairs(v, &format!("{id}/arguments"), false)?,
        None => Vec::new(),
    };

    let environment = match map.get("environment") {
        Some(v) => parse_pairs(v, &format!("{id}/environment"), true)?,
        None => Vec::new(),
    };

    let start_environment = match map.get("start-environment") {
        Some(v) => parse_pairs(v, &format!("{id}/start-environment"), true)?,
        None => Vec::new(),
    };

    let volumes = match map.get("volumes") {
        Some(v) => parse_pairs(v, &format!("{id}/volumes"), false)?,
        None => Vec::new(),
    };

    let oci = match map.get("oci") {
        Some(v) => Some(parse_oci(v, &id)?),
        None => None,
    };

    let scripts = match map.get("scripts") {
        Some(v) => parse_scripts(v, name)?,
        None => Vec::new(),
    };

    let start = match map.get("start") {
        Some(v) => parse_pairs(v, &format!("{id}/start"), false)?,
        None => Vec::new(),
    };

    let serial = match map.get("serial") {
        Some(v) => require_int(v, &format!("{id} (serial / #{nro})"))?,
        None => crate::constants::DEFAULT_SERIAL,
    };

    Ok(ServiceDef {
        priority,
        name: jail_name,
        makejail,
        reset_options,
        ignore_mtime,
        options,
        arguments,
        environment,
        start_environment,
        oci,
        volumes,
        scripts,
        start,
        serial,
    })
}

fn parse_oci(value: &Value, id: &str) -> Result<OciDef, DirectorError> {
    let map = value
        .as_mapping()
        .ok_or_else(|| DirectorError::InvalidSpec(format!("{id}/oci: Must be a Mapping.")))?;

    let user = map.get("user").map(coerce_string);
    let workdir = map.get("workdir").map(coerce_string);
    let environment = match map.get("environment") {
        Some(v) => parse_pairs(v, &format!("{id}/oci/environment"), false)?,
        None => Vec::new(),
    };

    Ok(OciDef {
        user,
        workdir,
        environment,
    })
}

fn parse_scripts(value: &Value, service_name: &str) -> Result<Vec<ScriptDef>, DirectorError> {
    let seq = value
        .as_sequence()
        .ok_or_else(|| DirectorError::InvalidSpec("scripts: Must be a List.".into()))?;

    let id = format!("services/{service_name}/scripts");
    let mut scripts = Vec::with_capacity(seq.len());

    for (nro, entry) in seq.iter().enumerate() {
        let nro = nro + 1;
        let map = entry
            .as_mapping()
            .ok_or_else(|| DirectorError::InvalidSpec(format!("{id} (#{nro}): Must be a Mapping.")))?;

        reject_unknown_keys(map, SCRIPT_KEYS, &format!("{id} (#{nro})"))?;

        let shell = match map.get("shell") {
            Some(v) => coerce_string(v),
            None => crate::constants::DEFAULT_SCRIPT_SHELL.to_string(),
        };

        let script_type = match map.get("type") {
            Some(v) => {
                let type_str = coerce_string(v);
                ScriptType::parse(&type_str).ok_or_else(|| {
                    DirectorError::InvalidSpec(format!(
                        "{id} (type / #{nro}): Only jexec, local and chroot can be used."
                    ))
                })?
            }
            None => ScriptType::parse(crate::constants::DEFAULT_SCRIPT_TYPE).unwrap(),
        };

        let text = map
            .get("text")
            .map(coerce_string)
            .ok_or_else(|| DirectorError::InvalidSpec(format!("{id} (text / #{nro}): Value required but not defined.")))?;

        scripts.push(ScriptDef {
            shell,
            script_type,
            text,
        });
    }

    Ok(scripts)
}

fn parse_volumes(value: &Value) -> Result<HashMap<String, VolumeDef>, DirectorError> {
    let map = value
        .as_mapping()
        .ok_or_else(|| DirectorError::InvalidSpec("volumes: Must be a Mapping.".into()))?;

    let mut volumes = HashMap::new();

    for (nro, (key, volume_value)) in map.iter().enumerate() {
        let nro = nro + 1;
        let name = coerce_string(key);
        let volume = parse_volume(volume_value, &name, nro)?;
        volumes.insert(name, volume);
    }

    Ok(volumes)
}

fn parse_volume(value: &Value, name: &str, nro: usize) -> Result<VolumeDef, DirectorError> {
    let id = format!("volumes/{name}");
    let map = value
        .as_mapping()
        .ok_or_else(|| DirectorError::InvalidSpec(format!("{id} (#{nro}): Must be a Mapping.")))?;

    reject_unknown_keys(map, VOLUME_KEYS, &format!("{id} (#{nro})"))?;

    let device = map
        .get("device")
        .map(coerce_string)
        .ok_or_else(|| DirectorError::InvalidSpec(format!("{id} (device / #{nro}): Value required but not defined.")))?;

    let volume_type = match map.get("type") {
        Some(v) => coerce_string(v),
        None => crate::constants::DEFAULT_VOLUME_TYPE.to_string(),
    };

    let options = match map.get("options") {
        Some(v) => coerce_string(v),
        None => crate::constants::DEFAULT_VOLUME_OPTIONS.to_string(),
    };

    let dump = match map.get("dump") {
        Some(v) => require_int(v, &format!("{id} (dump / #{nro})"))?,
        None => 0,
    };

    let pass = match map.get("pass") {
        Some(v) => require_int(v, &format!("{id} (pass / #{nro})"))?,
        None => 0,
    };

    let umask = map.get("umask").map(coerce_string);
    let mode = map.get("mode").map(coerce_string);
    let owner = map.get("owner").map(coerce_string);
    let group = map.get("group").map(coerce_string);

    Ok(VolumeDef {
        device,
        volume_type,
        options,
        dump,
        pass,
        umask,
        mode,
        owner,
        group,
    })
}

/// Parse an "ordered sequence of single-entry mappings". `allow_none`
/// controls whether a null value is tolerated.
fn parse_pairs(value: &Value, id: &str, allow_none: bool) -> Result<OrderedPairs, DirectorError> {
    let seq = value
        .as_sequence()
        .ok_or_else(|| DirectorError::InvalidSpec(format!("{id}: Must be a List.")))?;

    let mut pairs = Vec::with_capacity(seq.len());

    for (nro, entry) in seq.iter().enumerate() {
        let nro = nro + 1;
        let map = entry
            .as_mapping()
            .ok_or_else(|| DirectorError::InvalidSpec(format!("{id} (#{nro}): Must be a Mapping.")))?;

        if map.len() != 1 {
            return Err(DirectorError::InvalidSpec(format!(
                "{id} (#{nro}): Invalid length. Must have only one element."
            )));
        }

        let (key, value) = map.iter().next().unwrap();
        let key_str = coerce_string(key);

        if value.is_null() {
            if !allow_none {
                return Err(DirectorError::InvalidSpec(format!(
                    "{id} ({key_str} / #{nro}): Value required but not defined."
                )));
            }
            pairs.push((key_str, None));
        } else {
            pairs.push((key_str, Some(coerce_string(value))));
        }
    }

    Ok(pairs)
}

fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

fn require_int(value: &Value, id: &str) -> Result<i64, DirectorError> {
    value
        .as_i64()
        .ok_or_else(|| DirectorError::InvalidSpec(format!("{id}: Must be an Integer.")))
}

fn require_bool(value: &Value, id: &str) -> Result<bool, DirectorError> {
    value
        .as_bool()
        .ok_or_else(|| DirectorError::InvalidSpec(format!("{id}: Must be a Boolean.")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_spec(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    #[test]
    fn parses_minimal_spec() {
        let file = write_spec(
            r#"
services:
  web:
    scripts:
      - text: "echo hi"
"#,
        );

        let spec = load(file.path()).unwrap();
        let web = spec.services.get("web").unwrap();
        assert_eq!(web.priority, crate::constants::DEFAULT_PRIORITY);
        assert_eq!(web.makejail, "Makejail");
        assert_eq!(web.scripts.len(), 1);
        assert_eq!(web.scripts[0].script_type, ScriptType::Jexec);
        assert_eq!(web.scripts[0].shell, "/bin/sh -c");
    }

    #[test]
    fn rejects_missing_services() {
        let file = write_spec("options: []\n");
        let result = load(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unknown_document_key() {
        let file = write_spec(
            r#"
foobar: 1
services:
  web:
    scripts: []
"#,
        );
        assert!(load(file.path()).is_err());
    }

    #[test]
    fn rejects_unknown_service_key() {
        let file = write_spec(
            r#"
services:
  web:
    priorty: 1
    scripts: []
"#,
        );
        assert!(load(file.path()).is_err());
    }

    #[test]
    fn rejects_bad_service_name() {
        let file = write_spec(
            r#"
services:
  "bad name":
    scripts: []
"#,
        );
        assert!(load(file.path()).is_err());
    }

    #[test]
    fn interpolates_env_with_default() {
        // SAFETY: test runs single-threaded with respect to this variable.
        unsafe {
            std::env::remove_var("DIRECTOR_TEST_VAR");
        }
        assert_eq!(interpolate("${DIRECTOR_TEST_VAR:-fallback}"), "fallback");

        // SAFETY: test runs single-threaded with respect to this variable.
        unsafe {
            std::env::set_var("DIRECTOR_TEST_VAR", "set");
        }
        assert_eq!(interpolate("${DIRECTOR_TEST_VAR:-fallback}"), "set");
    }

    #[test]
    fn preserves_sequence_order() {
        let file = write_spec(
            r#"
services:
  web:
    options:
      - b: "2"
      - a: "1"
    scripts: []
"#,
        );

        let spec = load(file.path()).unwrap();
        let web = spec.services.get("web").unwrap();
        assert_eq!(
            web.options,
            vec![("b".to_string(), Some("2".to_string())), ("a".to_string(), Some("1".to_string()))]
        );
    }

    #[test]
    fn equality_is_order_independent_for_mappings() {
        let a = write_spec(
            r#"
services:
  web:
    scripts: []
  db:
    scripts: []
"#,
        );
        let b = write_spec(
            r#"
services:
  db:
    scripts: []
  web:
    scripts: []
"#,
        );

        assert_eq!(load(a.path()).unwrap(), load(b.path()).unwrap());
    }
}
