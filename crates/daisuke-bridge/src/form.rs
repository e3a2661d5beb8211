//! Form sessions.
//!
//! A [`FormSession`] holds the user's edits to a runner-provided [`Form`].
//! What an edit does depends on the [`FormContext`]: preference edits are
//! pushed to the runner one key at a time, while setup and tracker entry
//! edits accumulate until [`FormSession::submit`].

use crate::error::{BridgeError, BridgeResult};
use crate::runner::Runner;
use daisuke_core::{ComponentType, Form, FormValue, FormValues};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// What a form is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormContext {
    Preference,
    Setup,
    Tracker { id: String },
}

impl FormContext {
    /// Preference forms push every change live and have nothing to submit.
    pub fn has_submit_button(&self) -> bool {
        !matches!(self, FormContext::Preference)
    }
}

/// Fetch the form for `context` from the runner and start a session on it.
pub async fn load_form(runner: Arc<Runner>, context: FormContext) -> BridgeResult<FormSession> {
    let form = match &context {
        FormContext::Preference => runner.get_preference_menu().await?,
        FormContext::Setup => runner.get_setup_menu().await?,
        FormContext::Tracker { id } => {
            let tracker = runner.as_tracker().ok_or_else(|| {
                BridgeError::InvalidRunner(format!("{} is not a content tracker", runner.id()))
            })?;
            tracker.get_entry_form(id).await?
        }
    };

    Ok(FormSession::new(runner, context, form))
}

/// Editing state of one form.
pub struct FormSession {
    runner: Arc<Runner>,
    context: FormContext,
    form: Form,
    values: FormValues,
    disabled: BTreeSet<String>,
    changed: bool,
}

impl FormSession {
    pub fn new(runner: Arc<Runner>, context: FormContext, form: Form) -> Self {
        let mut session = Self {
            runner,
            context,
            form,
            values: FormValues::new(),
            disabled: BTreeSet::new(),
            changed: false,
        };
        session.seed();
        session
    }

    /// Copy each component's declared value into the mapping.
    pub fn seed(&mut self) {
        for component in self.form.components() {
            if let Some(value) = &component.value {
                self.values.insert(component.key.clone(), value.clone());
            }
        }
    }

    pub fn form(&self) -> &Form {
        &self.form
    }

    pub fn context(&self) -> &FormContext {
        &self.context
    }

    pub fn values(&self) -> &FormValues {
        &self.values
    }

    pub fn value(&self, key: &str) -> Option<&FormValue> {
        self.values.get(key)
    }

    pub fn has_changed(&self) -> bool {
        self.changed
    }

    pub fn is_disabled(&self, key: &str) -> bool {
        self.disabled.contains(key)
    }

    /// Record an edit to a component.
    ///
    /// Stepper values are clamped to the component's bounds and multipicker
    /// selections are limited to the declared options. In a preference form
    /// the value is pushed to the runner before returning.
    pub async fn did_set(&mut self, key: &str, value: FormValue) -> BridgeResult<()> {
        let component = self
            .form
            .component(key)
            .ok_or_else(|| BridgeError::UnknownComponent(key.to_string()))?;

        let value = match (component.component_type, value) {
            (ComponentType::Stepper, FormValue::Number(n)) => FormValue::Number(component.clamp(n)),
            (ComponentType::Multipicker, FormValue::StringSet(selected)) => {
                FormValue::StringSet(component.known_selections(&selected))
            }
            (_, value) => value,
        };

        self.changed = true;
        self.disabled.remove(key);
        self.values.insert(key.to_string(), value.clone());

        if self.context == FormContext::Preference {
            debug!("Updating preference {} on {}", key, self.runner.id());
            self.runner.update_preference(key, &value).await?;
        }
        Ok(())
    }

    /// Remove an optional component's value and mark it disabled.
    ///
    /// Returns `false` if the component is not optional.
    pub fn remove(&mut self, key: &str) -> bool {
        let optional = self
            .form
            .component(key)
            .map(|c| c.is_optional)
            .unwrap_or(false);
        if !optional {
            return false;
        }

        self.values.remove(key);
        self.disabled.insert(key.to_string());
        self.changed = true;
        true
    }

    /// Re-enable a removed component. The previous value is not restored.
    pub fn enable(&mut self, key: &str) {
        self.disabled.remove(key);
    }

    /// Submit the accumulated values.
    ///
    /// Failures are returned so the caller can retry; the session keeps its
    /// values either way.
    pub async fn submit(&mut self) -> BridgeResult<()> {
        let result = match &self.context {
            FormContext::Preference => return Ok(()),
            FormContext::Setup => self
                .runner
                .validate_setup_form(&self.values)
                .await
                .map(|_| format!("{} Setup!", self.runner.name())),
            FormContext::Tracker { id } => match self.runner.as_tracker() {
                Some(tracker) => tracker
                    .did_submit_entry_form(id, &self.values)
                    .await
                    .map(|_| "Done.".to_string()),
                None => Err(BridgeError::InvalidRunner(format!(
                    "{} is not a content tracker",
                    self.runner.id()
                ))),
            },
        };

        match result {
            Ok(message) => {
                self.changed = false;
                self.runner.notifier().info(&message);
                Ok(())
            }
            Err(e) => {
                warn!("Form submission to {} failed: {}", self.runner.id(), e);
                Err(e)
            }
        }
    }
}
