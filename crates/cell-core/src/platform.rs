//! Filesystem layout of the agent and the working directory inside a task container.
/// Directory name of the project checkout below [`Platform::working_volume_mountpoint`].
pub const WORKING_VOLUME_WORKING_DIR: &str = "working-dir";

/// Container platform of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows { os_version: String },
}

impl Platform {
    pub fn unix() -> Self {
        Platform::Unix
    }

    pub fn windows(os_version: impl Into<String>) -> Self {
        Platform::Windows {
            os_version: os_version.into(),
        }
    }

    fn separator(&self) -> char {
        match self {
            Platform::Unix => '/',
            Platform::Windows { .. } => '\\',
        }
    }

    /// Mount point of the volume carrying the agent binary.
    pub fn container_agent_volume_dir(&self) -> &'static str {
        match self {
            Platform::Unix => "/tmp/cirrus-ci-agent",
            Platform::Windows { .. } => r"C:\cirrus-ci-agent",
        }
    }

    /// Full path of the agent binary inside the container.
    pub fn container_agent_path(&self) -> String {
        match self {
            Platform::Unix => format!("{}/cirrus-ci-agent", self.container_agent_volume_dir()),
            Platform::Windows { .. } => {
                format!(r"{}\cirrus-ci-agent.exe", self.container_agent_volume_dir())
            }
        }
    }

    /// Mount point of the working volume.
    pub fn working_volume_mountpoint(&self) -> &'static str {
        match self {
            Platform::Unix => "/tmp/cirrus-ci",
            Platform::Windows { .. } => r"C:\Windows\Temp\cirrus-ci",
        }
    }

    /// Default working directory of a task in clean mode.
    pub fn working_directory(&self) -> String {
        format!(
            "{}{}{}",
            self.working_volume_mountpoint(),
            self.separator(),
            WORKING_VOLUME_WORKING_DIR
        )
    }
}

/// Host operating system in the naming used by task descriptors and agent binaries.
pub fn host_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// Host CPU architecture in the naming used by agent binaries.
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}
