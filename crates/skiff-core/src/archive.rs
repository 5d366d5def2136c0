//! Archive formats understood by the remote shell compress feature.

use crate::path::{Path, PathType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarBz2,
    Zip,
    Gzip,
    Bzip2,
}

/// Describes how to build and unpack one archive format with shell
/// commands. `{archive}`, `{files}`, `{workdir}` and `{parent}` are replaced
/// with shell-quoted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Archive {
    pub format: ArchiveFormat,
    pub extension: &'static str,
    compress: &'static str,
    decompress: &'static str,
}

pub const TAR: Archive = Archive {
    format: ArchiveFormat::Tar,
    extension: "tar",
    compress: "cd {workdir}; tar -cpPf {archive} {files}",
    decompress: "tar -xpPf {archive} -C {parent}",
};

pub const TARGZ: Archive = Archive {
    format: ArchiveFormat::TarGz,
    extension: "tar.gz",
    compress: "cd {workdir}; tar -czpPf {archive} {files}",
    decompress: "tar -xzpPf {archive} -C {parent}",
};

pub const TARBZ2: Archive = Archive {
    format: ArchiveFormat::TarBz2,
    extension: "tar.bz2",
    compress: "cd {workdir}; tar -cjpPf {archive} {files}",
    decompress: "tar -xjpPf {archive} -C {parent}",
};

pub const ZIP: Archive = Archive {
    format: ArchiveFormat::Zip,
    extension: "zip",
    compress: "cd {workdir}; zip -qr {archive} {files}",
    decompress: "unzip -qn {archive} -d {parent}",
};

pub const GZIP: Archive = Archive {
    format: ArchiveFormat::Gzip,
    extension: "gz",
    compress: "cd {workdir}; gzip -qr {files}",
    decompress: "gzip -d {archive}",
};

pub const BZ2: Archive = Archive {
    format: ArchiveFormat::Bzip2,
    extension: "bz2",
    compress: "cd {workdir}; bzip2 -zk {files}",
    decompress: "bzip2 -dk {archive}",
};

const ALL: [Archive; 6] = [TAR, TARGZ, TARBZ2, ZIP, GZIP, BZ2];

impl Archive {
    pub fn all() -> &'static [Archive] {
        &ALL
    }

    /// Pick the format by the longest matching extension, so `a.tar.gz` is
    /// TARGZ rather than GZIP.
    pub fn for_file(name: &str) -> Option<Archive> {
        let lower = name.to_ascii_lowercase();
        ALL.iter()
            .filter(|a| lower.ends_with(&format!(".{}", a.extension)))
            .max_by_key(|a| a.extension.len())
            .copied()
    }

    /// Target archive inside `workdir`: named after the single selected file,
    /// or `Archive` for a multiple selection.
    pub fn archive_path(&self, workdir: &Path, files: &[Path]) -> Path {
        let stem = match files {
            [single] => single.name().to_string(),
            _ => "Archive".to_string(),
        };
        Path::child(
            workdir,
            &format!("{}.{}", stem, self.extension),
            PathType::FILE,
        )
    }

    pub fn compress_command(&self, workdir: &Path, files: &[Path]) -> String {
        let names = files
            .iter()
            .map(|f| shell_quote(&relative_to(f, workdir)))
            .collect::<Vec<_>>()
            .join(" ");
        self.compress
            .replace("{workdir}", &shell_quote(workdir.absolute()))
            .replace(
                "{archive}",
                &shell_quote(self.archive_path(workdir, files).absolute()),
            )
            .replace("{files}", &names)
    }

    pub fn decompress_command(&self, file: &Path) -> String {
        let parent = file.parent().unwrap_or_else(Path::root);
        self.decompress
            .replace("{archive}", &shell_quote(file.absolute()))
            .replace("{parent}", &shell_quote(parent.absolute()))
    }
}

fn relative_to(file: &Path, workdir: &Path) -> String {
    if file.is_child_of(workdir) {
        let prefix_len = if workdir.is_root() {
            1
        } else {
            workdir.absolute().len() + 1
        };
        file.absolute()[prefix_len..].to_string()
    } else {
        file.absolute().to_string()
    }
}

/// Single-quote for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
