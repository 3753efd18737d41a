// SPDX-License-Identifier: GPL-3.0-only

//! Installing helper tools through the native package manager

use serde::{Deserialize, Serialize};

use crate::error::{Result, RollbackError};
use crate::exec::{CommandExecutor, Invocation};
use crate::transcript::Transcript;

/// Native package managers of distributions that ship LVM root layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    #[default]
    Dnf,
    Yum,
    Apt,
    Zypper,
}

impl PackageManager {
    /// Program and base arguments of a non-interactive install
    pub fn install_command(self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::Dnf => ("dnf", &["install", "-y"]),
            Self::Yum => ("yum", &["install", "-y"]),
            Self::Apt => ("apt-get", &["install", "-y"]),
            Self::Zypper => ("zypper", &["--non-interactive", "install"]),
        }
    }

    pub fn install(
        self,
        exec: &dyn CommandExecutor,
        package: &str,
        transcript: &mut Transcript,
    ) -> Result<()> {
        if package.is_empty()
            || package.starts_with('-')
            || !package
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '_' | '.' | '-'))
        {
            return Err(RollbackError::InvalidName {
                kind: "package",
                value: package.to_string(),
            });
        }
        let (program, base) = self.install_command();
        let invocation = Invocation::mutation(program).args(base.iter().copied()).arg(package);
        exec.execute(&invocation)?
            .require("install package", &invocation)?;
        transcript.done(invocation.render());
        Ok(())
    }
}
