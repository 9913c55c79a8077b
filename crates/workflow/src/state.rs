use std::fmt;

use crate::events::ServiceKind;

/// Active configuration of the workflow. `ShowingEditor` is a parallel state
/// with independent `errors` and `editing` regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Initial,
    ReadingFeature,
    ShowingError,
    ShowingResources(ResourcesState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourcesState {
    ReadingResource,
    LoadingResource,
    ShowingEditor(EditorState),
    ResourceInvalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditorState {
    pub errors: ErrorsRegion,
    pub editing: EditingRegion,
}

impl Default for EditorState {
    fn default() -> Self {
        Self {
            errors: ErrorsRegion::None,
            editing: EditingRegion::Enabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorsRegion {
    None,
    Some,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditingRegion {
    Enabled,
    SavingNewRemote,
    SavingEdited,
}

impl WorkflowState {
    pub fn editor(editor: EditorState) -> Self {
        Self::ShowingResources(ResourcesState::ShowingEditor(editor))
    }

    /// Dotted path of every active leaf, one per parallel region.
    pub fn paths(&self) -> Vec<String> {
        match self {
            Self::Initial => vec!["Initial".to_string()],
            Self::ReadingFeature => vec!["ReadingFeature".to_string()],
            Self::ShowingError => vec!["ShowingError".to_string()],
            Self::ShowingResources(resources) => {
                let prefix = "ShowingResources";
                match resources {
                    ResourcesState::ReadingResource => vec![format!("{prefix}.ReadingResource")],
                    ResourcesState::LoadingResource => vec![format!("{prefix}.LoadingResource")],
                    ResourcesState::ResourceInvalid => vec![format!("{prefix}.ResourceInvalid")],
                    ResourcesState::ShowingEditor(editor) => vec![
                        format!("{prefix}.ShowingEditor.errors.{}", editor.errors.name()),
                        format!("{prefix}.ShowingEditor.editing.{}", editor.editing.name()),
                    ],
                }
            }
        }
    }

    /// True when `path` names a contiguous run of segments in an active path,
    /// so both `"ShowingResources.ShowingEditor"` and `"editing.Enabled"` match.
    pub fn matches(&self, path: &str) -> bool {
        let wanted: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        if wanted.is_empty() {
            return false;
        }
        self.paths().iter().any(|active| {
            let segments: Vec<&str> = active.split('.').collect();
            segments
                .windows(wanted.len())
                .any(|window| window == wanted.as_slice())
        })
    }

    pub fn editor_state(&self) -> Option<EditorState> {
        match self {
            Self::ShowingResources(ResourcesState::ShowingEditor(editor)) => Some(*editor),
            _ => None,
        }
    }

    /// Service invoked while this state is active.
    pub fn invoked_service(&self) -> Option<ServiceKind> {
        match self {
            Self::Initial => Some(ServiceKind::GetFeatures),
            Self::ShowingResources(ResourcesState::LoadingResource) => {
                Some(ServiceKind::ParseResource)
            }
            Self::ShowingResources(ResourcesState::ShowingEditor(editor)) => match editor.editing {
                EditingRegion::Enabled => None,
                EditingRegion::SavingNewRemote => Some(ServiceKind::SaveNewRemote),
                EditingRegion::SavingEdited => Some(ServiceKind::SaveEdited),
            },
            _ => None,
        }
    }

    pub fn is_saving(&self) -> bool {
        matches!(
            self.invoked_service(),
            Some(ServiceKind::SaveNewRemote | ServiceKind::SaveEdited)
        )
    }
}

impl ErrorsRegion {
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Some => "Some",
        }
    }
}

impl EditingRegion {
    pub fn name(self) -> &'static str {
        match self {
            Self::Enabled => "Enabled",
            Self::SavingNewRemote => "SavingNewRemote",
            Self::SavingEdited => "SavingEdited",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.paths().join(" | "))
    }
}
