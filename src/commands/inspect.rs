//! Read-only token inspection commands.

use anyhow::Result;

use super::open_token;
use crate::token::{MechanismSummary, ObjectSummary};
use crate::utils::config::TokenSettings;
use crate::utils::output::{print_json, print_plain};

/// Command to list objects on the token
pub struct ListObjectsCommand {
    pub settings: TokenSettings,
    pub label: Option<String>,
    pub json: bool,
}

impl ListObjectsCommand {
    pub fn new(settings: TokenSettings, label: Option<String>, json: bool) -> Self {
        Self {
            settings,
            label,
            json,
        }
    }

    pub fn execute(&self) -> Result<()> {
        let mut token = open_token(&self.settings)?;
        let objects = token.list_objects(self.label.as_deref())?;
        token.finalise()?;

        if self.json {
            return print_json(&objects);
        }

        if objects.is_empty() {
            print_plain("No objects found.");
            return Ok(());
        }

        for object in &objects {
            print_plain(&format_object(object));
        }
        Ok(())
    }
}

fn format_object(object: &ObjectSummary) -> String {
    let mut line = format!("Object {}:", object.handle);
    if let Some(class) = &object.class {
        line.push_str(&format!(" class={}", class));
    }
    if let Some(key_type) = &object.key_type {
        line.push_str(&format!(" key_type={}", key_type));
    }
    if let Some(label) = &object.label {
        line.push_str(&format!(" label='{}'", label));
    }
    if let Some(id) = &object.id {
        line.push_str(&format!(" id='{}'", id));
    }
    line
}

/// Command to list the mechanisms the token's slot supports
pub struct MechanismsCommand {
    pub settings: TokenSettings,
    pub json: bool,
}

impl MechanismsCommand {
    pub fn new(settings: TokenSettings, json: bool) -> Self {
        Self { settings, json }
    }

    pub fn execute(&self) -> Result<()> {
        let mut token = open_token(&self.settings)?;
        let mechanisms = token.list_mechanisms()?;
        token.finalise()?;

        if self.json {
            return print_json(&mechanisms);
        }

        for mechanism in &mechanisms {
            print_plain(&format_mechanism(mechanism));
        }
        Ok(())
    }
}

fn format_mechanism(mechanism: &MechanismSummary) -> String {
    format!(
        "{} min={} max={} flags={}",
        mechanism.name,
        mechanism.min_key_size,
        mechanism.max_key_size,
        mechanism.flags.join("|")
    )
}
