// Template files - flat `Field:~:Value` snapshots of the operator form
//
// One field per line. Line order is insignificant, unknown fields are skipped
// and a bad line never discards the fields applied before it.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::job::{CommitFlag, DiffMode, JobForm, OperationKind, TransferDirection, WriteStyle};

pub mod obfuscate;

pub use obfuscate::{obfuscate, reveal, ObfuscationError};

/// Separates field name from value on each line
pub const SEPARATOR: &str = ":~:";

/// Template file error types
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("cannot access template file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{field} spans several lines; template values must fit on one line")]
    MultiLine { path: PathBuf, field: &'static str },
}

/// The fixed set of persisted fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TemplateField {
    Ip,
    Timeout,
    ConnTimeout,
    Port,
    Username,
    Password,
    WriteToFileBool,
    WriteToFileLoc,
    SingleOrMultipleFiles,
    Option,
    FirstArgument,
    ScpDest,
    ScpDirection,
    CommitCheck,
    CommitConfirmed,
    CommitConfirmedMin,
    CommitBlank,
    CommitAt,
    CommitAtTime,
    CommitComment,
    CommitCommentValue,
    CommitSynch,
    Format,
    DiffMode,
}

impl TemplateField {
    pub const ALL: [TemplateField; 24] = [
        TemplateField::Ip,
        TemplateField::Timeout,
        TemplateField::ConnTimeout,
        TemplateField::Port,
        TemplateField::Username,
        TemplateField::Password,
        TemplateField::WriteToFileBool,
        TemplateField::WriteToFileLoc,
        TemplateField::SingleOrMultipleFiles,
        TemplateField::Option,
        TemplateField::FirstArgument,
        TemplateField::ScpDest,
        TemplateField::ScpDirection,
        TemplateField::CommitCheck,
        TemplateField::CommitConfirmed,
        TemplateField::CommitConfirmedMin,
        TemplateField::CommitBlank,
        TemplateField::CommitAt,
        TemplateField::CommitAtTime,
        TemplateField::CommitComment,
        TemplateField::CommitCommentValue,
        TemplateField::CommitSynch,
        TemplateField::Format,
        TemplateField::DiffMode,
    ];

    /// Name as written on disk
    pub fn name(&self) -> &'static str {
        match self {
            TemplateField::Ip => "IP",
            TemplateField::Timeout => "Timeout",
            TemplateField::ConnTimeout => "ConnTimeout",
            TemplateField::Port => "Port",
            TemplateField::Username => "Username",
            TemplateField::Password => "Password",
            TemplateField::WriteToFileBool => "WriteToFileBool",
            TemplateField::WriteToFileLoc => "WriteToFileLoc",
            TemplateField::SingleOrMultipleFiles => "SingleOrMultipleFiles",
            TemplateField::Option => "Option",
            TemplateField::FirstArgument => "FirstArgument",
            TemplateField::ScpDest => "SCPDest",
            TemplateField::ScpDirection => "SCPDirection",
            TemplateField::CommitCheck => "CommitCheck",
            TemplateField::CommitConfirmed => "CommitConfirmed",
            TemplateField::CommitConfirmedMin => "CommitConfirmedMin",
            TemplateField::CommitBlank => "CommitBlank",
            TemplateField::CommitAt => "CommitAt",
            TemplateField::CommitAtTime => "CommitAtTime",
            TemplateField::CommitComment => "CommitComment",
            TemplateField::CommitCommentValue => "CommitCommentValue",
            TemplateField::CommitSynch => "CommitSynch",
            TemplateField::Format => "Format",
            TemplateField::DiffMode => "DiffMode",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }

    /// The field whose value is obfuscated on disk
    pub fn is_secret(&self) -> bool {
        matches!(self, TemplateField::Password)
    }
}

impl fmt::Display for TemplateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A problem with one line or field that did not stop the load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateIssue {
    pub line: Option<usize>,
    pub field: Option<&'static str>,
    pub message: String,
}

impl fmt::Display for TemplateIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(line) = self.line {
            write!(f, "line {}: ", line)?;
        }
        if let Some(field) = self.field {
            write!(f, "{}: ", field)?;
        }
        f.write_str(&self.message)
    }
}

/// Snapshot of field values; the secret is held decoded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateRecord {
    values: BTreeMap<TemplateField, String>,
}

impl TemplateRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: TemplateField, value: impl Into<String>) {
        self.values.insert(field, value.into());
    }

    pub fn get(&self, field: TemplateField) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TemplateField, &str)> {
        self.values.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Capture every field of the form
    pub fn from_form(form: &JobForm) -> Self {
        let mut record = TemplateRecord::new();
        let flag = |on: bool| if on { "1" } else { "0" };

        record.set(TemplateField::Ip, form.hosts.as_str());
        record.set(TemplateField::Timeout, form.session_timeout.as_str());
        record.set(TemplateField::ConnTimeout, form.connect_timeout.as_str());
        record.set(TemplateField::Port, form.port.as_str());
        record.set(TemplateField::Username, form.username.as_str());
        record.set(TemplateField::Password, form.secret.as_str());
        record.set(TemplateField::WriteToFileBool, flag(form.write_to_file));
        record.set(TemplateField::WriteToFileLoc, form.write_location.as_str());
        record.set(TemplateField::SingleOrMultipleFiles, form.write_style.key());
        record.set(TemplateField::Option, form.operation.label());
        record.set(TemplateField::FirstArgument, form.first_argument.as_str());
        record.set(TemplateField::ScpDest, form.transfer_destination.as_str());
        record.set(TemplateField::ScpDirection, form.transfer_direction.label());
        record.set(TemplateField::CommitCheck, flag(form.commit.check));
        record.set(TemplateField::CommitConfirmed, flag(form.commit.confirmed));
        record.set(
            TemplateField::CommitConfirmedMin,
            form.commit_confirmed_minutes.as_str(),
        );
        record.set(TemplateField::CommitBlank, flag(form.commit.blank));
        record.set(TemplateField::CommitAt, flag(form.commit.at));
        record.set(TemplateField::CommitAtTime, form.commit_at_time.as_str());
        record.set(TemplateField::CommitComment, flag(form.commit.comment));
        record.set(TemplateField::CommitCommentValue, form.commit_comment.as_str());
        record.set(TemplateField::CommitSynch, flag(form.commit.synchronize));
        record.set(TemplateField::Format, flag(form.xml_format));
        record.set(TemplateField::DiffMode, form.diff_mode.label());

        record
    }

    /// Apply the recorded fields onto a form, one at a time.
    ///
    /// A value that does not fit its field is reported and skipped; fields
    /// already applied stay applied.
    pub fn apply_to(&self, form: &mut JobForm) -> Vec<TemplateIssue> {
        let mut issues = Vec::new();

        for (field, value) in self.iter() {
            if let Err(message) = apply_field(form, field, value) {
                issues.push(TemplateIssue {
                    line: None,
                    field: Some(field.name()),
                    message,
                });
            }
        }

        // Re-select so commit options left over from another operation drop out
        form.select_operation(form.operation);
        issues
    }
}

fn apply_field(form: &mut JobForm, field: TemplateField, value: &str) -> Result<(), String> {
    match field {
        TemplateField::Ip => form.hosts = value.to_string(),
        TemplateField::Timeout => form.session_timeout = value.to_string(),
        TemplateField::ConnTimeout => form.connect_timeout = value.to_string(),
        TemplateField::Port => form.port = value.to_string(),
        TemplateField::Username => form.username = value.to_string(),
        TemplateField::Password => form.secret = value.to_string(),
        TemplateField::WriteToFileBool => form.write_to_file = parse_flag(value)?,
        TemplateField::WriteToFileLoc => form.write_location = value.to_string(),
        TemplateField::SingleOrMultipleFiles => {
            form.write_style = WriteStyle::from_key(value)
                .ok_or_else(|| format!("unknown write style key '{}'", value))?;
        }
        TemplateField::Option => form.operation = value.parse::<OperationKind>()?,
        TemplateField::FirstArgument => form.first_argument = value.to_string(),
        TemplateField::ScpDest => form.transfer_destination = value.to_string(),
        TemplateField::ScpDirection => {
            form.transfer_direction = value.parse::<TransferDirection>()?
        }
        TemplateField::CommitCheck => set_commit(form, CommitFlag::Check, value)?,
        TemplateField::CommitConfirmed => set_commit(form, CommitFlag::Confirmed, value)?,
        TemplateField::CommitConfirmedMin => form.commit_confirmed_minutes = value.to_string(),
        TemplateField::CommitBlank => set_commit(form, CommitFlag::Blank, value)?,
        TemplateField::CommitAt => set_commit(form, CommitFlag::At, value)?,
        TemplateField::CommitAtTime => form.commit_at_time = value.to_string(),
        TemplateField::CommitComment => set_commit(form, CommitFlag::Comment, value)?,
        TemplateField::CommitCommentValue => form.commit_comment = value.to_string(),
        TemplateField::CommitSynch => set_commit(form, CommitFlag::Synchronize, value)?,
        TemplateField::Format => form.xml_format = parse_flag(value)?,
        TemplateField::DiffMode => form.diff_mode = value.parse::<DiffMode>()?,
    }
    Ok(())
}

// Stored flags are a snapshot, so they bypass the exclusivity rules
fn set_commit(form: &mut JobForm, flag: CommitFlag, value: &str) -> Result<(), String> {
    let on = parse_flag(value)?;
    let commit = &mut form.commit;
    match flag {
        CommitFlag::Check => commit.check = on,
        CommitFlag::Confirmed => commit.confirmed = on,
        CommitFlag::Blank => commit.blank = on,
        CommitFlag::At => commit.at = on,
        CommitFlag::Comment => commit.comment = on,
        CommitFlag::Synchronize => commit.synchronize = on,
    }
    Ok(())
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim() {
        "1" | "true" | "True" => Ok(true),
        "0" | "false" | "False" | "" => Ok(false),
        other => Err(format!("expected 0 or 1, found '{}'", other)),
    }
}

/// Outcome of reading a template file
#[derive(Debug, Default)]
pub struct TemplateLoad {
    pub record: TemplateRecord,
    /// Lines that could not be parsed
    pub issues: Vec<TemplateIssue>,
    /// Field names this version does not know
    pub unknown: Vec<String>,
}

/// Reads and writes template files
pub struct TemplateStore;

impl TemplateStore {
    /// Write every field of the record, obfuscating the secret
    pub fn save(record: &TemplateRecord, path: &Path) -> Result<(), TemplateError> {
        let io_err = |source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut content = String::new();
        for (field, value) in record.iter() {
            content.push_str(field.name());
            content.push_str(SEPARATOR);
            if field.is_secret() {
                content.push_str(&obfuscate(value));
            } else if value.contains(['\n', '\r']) {
                // A line break would start a new field on load
                return Err(TemplateError::MultiLine {
                    path: path.to_path_buf(),
                    field: field.name(),
                });
            } else {
                content.push_str(value);
            }
            content.push('\n');
        }

        let mut file = std::fs::File::create(path).map_err(io_err)?;
        file.write_all(content.as_bytes()).map_err(io_err)?;

        info!(path = %path.display(), fields = record.len(), "saved template");
        Ok(())
    }

    /// Read a template file into a record.
    ///
    /// Only an unreadable file is an error; bad lines become issues.
    pub fn load(path: &Path) -> Result<TemplateLoad, TemplateError> {
        let content = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let loaded = Self::parse(&content);
        debug!(
            path = %path.display(),
            fields = loaded.record.len(),
            issues = loaded.issues.len(),
            "loaded template"
        );
        Ok(loaded)
    }

    /// Parse template content
    pub fn parse(content: &str) -> TemplateLoad {
        let mut loaded = TemplateLoad::default();

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            if raw.trim().is_empty() {
                continue;
            }

            let Some((name, value)) = raw.split_once(SEPARATOR) else {
                loaded.issues.push(TemplateIssue {
                    line: Some(line_no),
                    field: None,
                    message: format!("missing '{}' separator", SEPARATOR),
                });
                continue;
            };

            let Some(field) = TemplateField::from_name(name.trim()) else {
                debug!(line = line_no, field = name, "skipping unknown template field");
                loaded.unknown.push(name.trim().to_string());
                continue;
            };

            let value = value.trim_end();
            if field.is_secret() {
                match reveal(value) {
                    Ok(secret) => loaded.record.set(field, secret),
                    Err(e) => loaded.issues.push(TemplateIssue {
                        line: Some(line_no),
                        field: Some(field.name()),
                        message: e.to_string(),
                    }),
                }
            } else {
                loaded.record.set(field, value);
            }
        }

        loaded
    }

    /// Load a file and apply it to a form.
    ///
    /// An unreadable file leaves the form untouched. Returns every issue from
    /// parsing and applying, for reporting once at the end.
    pub fn load_into(path: &Path, form: &mut JobForm) -> Result<TemplateLoad, TemplateError> {
        let mut loaded = Self::load(path)?;
        let apply_issues = loaded.record.apply_to(form);
        loaded.issues.extend(apply_issues);

        if !loaded.issues.is_empty() {
            warn!(
                path = %path.display(),
                issues = loaded.issues.len(),
                "template loaded with issues"
            );
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_form() -> JobForm {
        let mut form = JobForm {
            hosts: "r1,r2".to_string(),
            username: "netops".to_string(),
            secret: "sw0rdfish".to_string(),
            first_argument: "set system ntp server 10.0.0.1".to_string(),
            write_to_file: true,
            write_location: "/tmp/out.txt".to_string(),
            write_style: WriteStyle::Multiple,
            ..JobForm::default()
        };
        form.select_operation(OperationKind::CommitSet);
        form.commit.set(CommitFlag::Confirmed, true);
        form.commit_confirmed_minutes = "5".to_string();
        form
    }

    #[test]
    fn test_round_trip_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmpl.txt");

        let record = TemplateRecord::from_form(&sample_form());
        TemplateStore::save(&record, &path).unwrap();
        let loaded = TemplateStore::load(&path).unwrap();

        assert_eq!(loaded.record, record);
        assert!(loaded.issues.is_empty());
        assert!(loaded.unknown.is_empty());
    }

    #[test]
    fn test_secret_stored_obfuscated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmpl.txt");

        let mut record = TemplateRecord::new();
        record.set(TemplateField::Password, "sw0rdfish");
        TemplateStore::save(&record, &path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, "Password:~:c3cwcmRmaXNo\n");

        let mut form = JobForm::default();
        TemplateStore::load_into(&path, &mut form).unwrap();
        assert_eq!(form.secret, "sw0rdfish");
    }

    #[test]
    fn test_form_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmpl.txt");
        let form = sample_form();

        TemplateStore::save(&TemplateRecord::from_form(&form), &path).unwrap();

        let mut restored = JobForm::default();
        let loaded = TemplateStore::load_into(&path, &mut restored).unwrap();
        assert!(loaded.issues.is_empty());
        assert_eq!(restored, form);
    }

    #[test]
    fn test_line_order_irrelevant() {
        let loaded = TemplateStore::parse(
            "DiffMode:~:Stanza\nOption:~:Diff Config\nIP:~:r9\nUsername:~:ops\n",
        );
        let mut form = JobForm::default();
        let issues = loaded.record.apply_to(&mut form);

        assert!(issues.is_empty());
        assert_eq!(form.hosts, "r9");
        assert_eq!(form.username, "ops");
        assert_eq!(form.diff_mode, DiffMode::Stanza);
        assert_eq!(form.operation, OperationKind::DiffConfig);
    }

    #[test]
    fn test_one_malformed_line_one_issue() {
        let content = "IP:~:r1\nUsername:~:ops\nthis line is broken\nPort:~:830\nTimeout:~:120\n";
        let loaded = TemplateStore::parse(content);

        assert_eq!(loaded.record.len(), 4);
        assert_eq!(loaded.issues.len(), 1);
        assert_eq!(loaded.issues[0].line, Some(3));

        let mut form = JobForm::default();
        assert!(loaded.record.apply_to(&mut form).is_empty());
        assert_eq!(form.port, "830");
        assert_eq!(form.session_timeout, "120");
    }

    #[test]
    fn test_unknown_fields_skipped() {
        let loaded = TemplateStore::parse("Theme:~:dark\nIP:~:r1\n");
        assert_eq!(loaded.unknown, vec!["Theme".to_string()]);
        assert!(loaded.issues.is_empty());
        assert_eq!(loaded.record.get(TemplateField::Ip), Some("r1"));
    }

    #[test]
    fn test_bad_value_keeps_earlier_fields() {
        let loaded = TemplateStore::parse("IP:~:r1\nWriteToFileBool:~:maybe\nUsername:~:ops\n");
        let mut form = JobForm::default();
        let issues = loaded.record.apply_to(&mut form);

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, Some("WriteToFileBool"));
        assert_eq!(form.hosts, "r1");
        assert_eq!(form.username, "ops");
    }

    #[test]
    fn test_write_style_selected_by_key() {
        let loaded = TemplateStore::parse("SingleOrMultipleFiles:~:m\n");
        let mut form = JobForm::default();
        loaded.record.apply_to(&mut form);
        assert_eq!(form.write_style, WriteStyle::Multiple);
    }

    #[test]
    fn test_commit_flags_dropped_for_other_operation() {
        let loaded = TemplateStore::parse("CommitSynch:~:1\nOption:~:Health Check\n");
        let mut form = JobForm::default();
        loaded.record.apply_to(&mut form);
        assert!(!form.commit.synchronize);
        assert_eq!(form.operation, OperationKind::HealthCheck);
    }

    #[test]
    fn test_missing_file_leaves_form() {
        let mut form = sample_form();
        let before = form.clone();
        let err = TemplateStore::load_into(Path::new("/nonexistent/tmpl.txt"), &mut form);

        assert!(matches!(err, Err(TemplateError::Io { .. })));
        assert_eq!(form, before);
    }

    #[test]
    fn test_multi_line_value_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmpl.txt");

        let mut record = TemplateRecord::new();
        record.set(TemplateField::FirstArgument, "show version\nPassword:~:aGFja2Vk");
        record.set(TemplateField::Password, "sw0rdfish");

        let err = TemplateStore::save(&record, &path).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::MultiLine {
                field: "FirstArgument",
                ..
            }
        ));
        assert!(!path.exists());

        record.set(TemplateField::FirstArgument, "show version\r");
        assert!(TemplateStore::save(&record, &path).is_err());
    }

    #[test]
    fn test_multi_line_secret_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmpl.txt");

        let mut record = TemplateRecord::new();
        record.set(TemplateField::Password, "line one\nline two");
        TemplateStore::save(&record, &path).unwrap();

        let loaded = TemplateStore::load(&path).unwrap();
        assert_eq!(loaded.record, record);
    }

    #[test]
    fn test_save_to_unwritable_path() {
        let record = TemplateRecord::from_form(&JobForm::default());
        let result = TemplateStore::save(&record, Path::new("/nonexistent/dir/tmpl.txt"));
        assert!(result.is_err());
    }
}
