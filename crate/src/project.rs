use serde::{Deserialize, Serialize};

/// Labeling interface for binary drone / not-drone image classification.
pub const LABEL_CONFIG: &str = r#"<View>
  <Image name="image" value="$image"/>
  <Choices name="choice" toName="image">
    <Choice value="drone"/>
    <Choice value="not_drone"/>
  </Choices>
</View>"#;

/// A project as returned by the labeling service.
///
/// `id` is optional so that a record missing it can be detected and
/// re-resolved instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct NewProject<'a> {
    pub title: &'a str,
    pub label_config: &'a str,
}

/// Holds the resolved project between calls.
///
/// Owned by the caller and handed to whatever needs project identity; it is
/// filled lazily and refilled when the cached record has no id.
#[derive(Debug, Default, Clone)]
pub struct ProjectSlot {
    project: Option<Project>,
}

impl ProjectSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(project: Project) -> Self {
        Self {
            project: Some(project),
        }
    }

    /// Cached id, if the slot holds a well-formed record.
    pub fn id(&self) -> Option<i64> {
        self.project.as_ref().and_then(|p| p.id)
    }

    pub fn project(&self) -> Option<&Project> {
        self.project.as_ref()
    }

    pub fn set(&mut self, project: Project) {
        self.project = Some(project);
    }

    pub fn clear(&mut self) {
        self.project = None;
    }
}

/// Trim, lowercase and drop every interior space.
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "")
}

/// Case and whitespace insensitive name comparison. Empty or absent names
/// never match.
pub fn is_match(project_name: Option<&str>, target_name: Option<&str>) -> bool {
    match (project_name, target_name) {
        (Some(project), Some(target)) if !project.is_empty() && !target.is_empty() => {
            let matched = normalize(project) == normalize(target);
            tracing::debug!(
                project = %project,
                target = %target,
                matched,
                "Compared project names"
            );
            matched
        }
        _ => {
            tracing::warn!(?project_name, ?target_name, "Project name comparison with an empty name");
            false
        }
    }
}
