//! IAR Embedded Workbench for Arm backend

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use super::{
    parse_with, to_strings, CompileInput, Diagnostic, FlagSet, Language, LinkInput, Profile,
    ToolCommand, Toolchain, ToolchainConfig,
};
use crate::core::target::{Core, Fpu};
use crate::error::BuildError;

fn diagnostic_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^"(?P<file>[^"]+)",(?P<line>\d+)\s+(?P<severity>Fatal error|Error|Warning|Remark)\[(?P<code>[A-Za-z]+\d+)\]:\s*(?P<message>.*)$"#,
        )
        .expect("valid diagnostic regex")
    })
}

/// `--cpu` value for iccarm/iasmarm
fn iar_cpu(core: Core) -> &'static str {
    match core {
        Core::CortexM0 => "Cortex-M0",
        Core::CortexM0Plus => "Cortex-M0+",
        Core::CortexM3 => "Cortex-M3",
        Core::CortexM4 | Core::CortexM4F => "Cortex-M4",
        Core::CortexM7 | Core::CortexM7F | Core::CortexM7FD => "Cortex-M7",
        Core::CortexM23 => "Cortex-M23",
        Core::CortexM33 | Core::CortexM33F => "Cortex-M33",
        Core::CortexA9 => "Cortex-A9",
    }
}

/// `--cpu`, `--fpu` and `--thumb` flags for a core
pub fn cpu_flags_for(core: Core) -> Vec<String> {
    let mut flags = vec![format!("--cpu={}", iar_cpu(core))];
    let fpu = match core.fpu() {
        Fpu::None => None,
        Fpu::SinglePrecisionV4 => Some("VFPv4_sp"),
        Fpu::SinglePrecisionV5 => Some("VFPv5_sp"),
        Fpu::DoublePrecisionV5 => Some("VFPv5"),
        Fpu::Neon => Some("VFPv3_Neon"),
    };
    if let Some(fpu) = fpu {
        flags.push(format!("--fpu={fpu}"));
    }
    if core.is_cortex_m() {
        flags.push("--thumb".to_string());
    }
    flags
}

fn profile_flags(profile: Profile) -> FlagSet {
    let mut common = to_strings(&[
        "--no_wrap_diagnostics",
        "-e",
        "--diag_suppress=Pa050,Pa084,Pa093,Pa082",
    ]);
    common.extend(to_strings(match profile {
        Profile::Debug => &["-On", "-r"],
        Profile::Develop => &["-Oh"],
        Profile::Release => &["-Ohz", "-DNDEBUG"],
    }));
    FlagSet {
        common,
        c: to_strings(&["--vla"]),
        cxx: to_strings(&["--c++", "--no_rtti", "--no_exceptions"]),
        asm: Vec::new(),
        ld: to_strings(&["--skip_dynamic_initialization", "--threaded_lib"]),
    }
}

/// IAR Embedded Workbench for Arm
#[derive(Debug, Clone)]
pub struct IarArm {
    iccarm: String,
    iasmarm: String,
    ilinkarm: String,
    iarchive: String,
    ielftool: String,
    cpu_flags: Vec<String>,
    flags: FlagSet,
    response_files: bool,
}

impl IarArm {
    /// Create the backend from a resolved config
    pub fn new(config: &ToolchainConfig) -> Self {
        let prefix = config.prefix.as_deref().unwrap_or_default();
        let mut flags = profile_flags(config.profile);
        flags.extend(&config.extra_flags);
        Self {
            iccarm: config.tool(&format!("{prefix}iccarm")),
            iasmarm: config.tool(&format!("{prefix}iasmarm")),
            ilinkarm: config.tool(&format!("{prefix}ilinkarm")),
            iarchive: config.tool(&format!("{prefix}iarchive")),
            ielftool: config.tool(&format!("{prefix}ielftool")),
            cpu_flags: cpu_flags_for(config.core),
            flags,
            response_files: config.response_files,
        }
    }

    fn compile(&self, lang_flags: &[String], input: &CompileInput<'_>) -> Vec<ToolCommand> {
        let mut cmd = vec![self.iccarm.clone()];
        cmd.extend(self.cpu_flags.iter().cloned());
        cmd.extend(self.flags.common.iter().cloned());
        cmd.extend(lang_flags.iter().cloned());
        cmd.extend(input.defines.iter().map(|d| format!("-D{d}")));
        if let Some(header) = input.config_header {
            cmd.extend(self.config_header_args(header));
        }
        cmd.extend(input.include_args.iter().cloned());
        if let Some(dep_file) = input.dep_file {
            cmd.extend([
                "--dependencies=m".to_string(),
                dep_file.display().to_string(),
            ]);
        }
        cmd.extend([
            "-o".to_string(),
            input.object.display().to_string(),
            input.source.display().to_string(),
        ]);
        vec![cmd]
    }
}

impl Toolchain for IarArm {
    fn name(&self) -> &'static str {
        "IAR"
    }

    fn labels(&self) -> &'static [&'static str] {
        &["IAR"]
    }

    fn linker_script_ext(&self) -> &'static str {
        "icf"
    }

    fn archive_ext(&self) -> &'static str {
        "a"
    }

    fn cpu_flags(&self) -> Vec<String> {
        self.cpu_flags.clone()
    }

    fn flags(&self) -> &FlagSet {
        &self.flags
    }

    fn supports_response_files(&self) -> bool {
        self.response_files
    }

    fn response_file_args(&self, path: &Path) -> Vec<String> {
        vec!["-f".to_string(), path.display().to_string()]
    }

    fn config_header_args(&self, header: &Path) -> Vec<String> {
        vec![format!("--preinclude={}", header.display())]
    }

    /// iasmarm writes no dependency file
    fn dep_file(&self, object: &Path, language: Language) -> Option<PathBuf> {
        (language != Language::Asm).then(|| object.with_extension("d"))
    }

    fn assemble(&self, input: &CompileInput<'_>) -> Vec<ToolCommand> {
        let mut cmd = vec![self.iasmarm.clone()];
        cmd.extend(self.cpu_flags.iter().cloned());
        cmd.extend(self.flags.asm.iter().cloned());
        cmd.extend(input.defines.iter().map(|d| format!("-D{d}")));
        cmd.extend(input.include_args.iter().cloned());
        cmd.extend([
            "-o".to_string(),
            input.object.display().to_string(),
            input.source.display().to_string(),
        ]);
        vec![cmd]
    }

    fn compile_c(&self, input: &CompileInput<'_>) -> Vec<ToolCommand> {
        self.compile(&self.flags.c, input)
    }

    fn compile_cpp(&self, input: &CompileInput<'_>) -> Vec<ToolCommand> {
        self.compile(&self.flags.cxx, input)
    }

    fn link(&self, input: &LinkInput<'_>) -> Vec<ToolCommand> {
        let mut cmd = vec![self.ilinkarm.clone()];
        cmd.extend(self.flags.ld.iter().cloned());
        cmd.extend(input.extra_args.iter().cloned());
        cmd.extend([
            "--config".to_string(),
            input.linker_script.display().to_string(),
            "--map".to_string(),
            input.map_file.display().to_string(),
            "-o".to_string(),
            input.output.display().to_string(),
        ]);
        cmd.extend(input.object_args.iter().cloned());
        cmd.extend(input.libraries.iter().map(|l| l.display().to_string()));
        vec![cmd]
    }

    fn archive(&self, object_args: &[String], output: &Path) -> Vec<ToolCommand> {
        let mut cmd = vec![
            self.iarchive.clone(),
            "--create".to_string(),
            output.display().to_string(),
        ];
        cmd.extend(object_args.iter().cloned());
        vec![cmd]
    }

    fn binary(&self, elf: &Path, output: &Path) -> ToolCommand {
        let format = if output.extension().is_some_and(|e| e == "hex") {
            "--ihex"
        } else {
            "--bin"
        };
        vec![
            self.ielftool.clone(),
            format.to_string(),
            elf.display().to_string(),
            output.display().to_string(),
        ]
    }

    fn parse_diagnostics(&self, output: &str) -> Vec<Diagnostic> {
        parse_with(diagnostic_regex(), output)
    }

    fn redirect_symbol(&self, source: &str, target: &str, _build_dir: &Path) -> Result<Vec<String>, BuildError> {
        Ok(vec!["--redirect".to_string(), format!("{source}={target}")])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::toolchain::Severity;

    fn backend() -> IarArm {
        IarArm::new(&ToolchainConfig::new(Core::CortexM4F).with_bin_dir("/opt/iar/bin"))
    }

    #[test]
    fn test_cpu_flags() {
        assert_eq!(
            cpu_flags_for(Core::CortexM4F),
            vec!["--cpu=Cortex-M4", "--fpu=VFPv4_sp", "--thumb"]
        );
        assert_eq!(cpu_flags_for(Core::CortexM0Plus), vec!["--cpu=Cortex-M0+", "--thumb"]);
    }

    #[test]
    fn test_asm_has_no_dep_file() {
        let iar = backend();
        let object = Path::new("/b/startup.o");
        assert_eq!(iar.dep_file(object, Language::Asm), None);
        assert_eq!(
            iar.dep_file(object, Language::C),
            Some(PathBuf::from("/b/startup.d"))
        );
    }

    #[test]
    fn test_compile_cpp_uses_preinclude_and_dependencies() {
        let input = CompileInput {
            source: Path::new("/p/main.cpp"),
            object: Path::new("/b/main.o"),
            dep_file: Some(Path::new("/b/main.d")),
            defines: &["DEVICE_SERIAL=1".to_string()],
            include_args: &["-f".to_string(), "/b/.includes_ff.txt".to_string()],
            config_header: Some(Path::new("/b/firmforge_config.h")),
        };
        let cmd = &backend().compile_cpp(&input)[0];
        assert_eq!(cmd[0], "/opt/iar/bin/iccarm");
        assert!(cmd.contains(&"--c++".to_string()));
        assert!(cmd.contains(&"--preinclude=/b/firmforge_config.h".to_string()));
        assert!(cmd.contains(&"-DDEVICE_SERIAL=1".to_string()));
        assert!(cmd.windows(2).any(|w| w[0] == "--dependencies=m" && w[1] == "/b/main.d"));
    }

    #[test]
    fn test_response_file_syntax() {
        let iar = backend();
        assert_eq!(iar.response_file_args(Path::new("/b/x.txt")), vec!["-f", "/b/x.txt"]);
        assert_eq!(iar.object_list_args(Path::new("/b/x.txt")), vec!["-f", "/b/x.txt"]);
    }

    #[test]
    fn test_parse_diagnostics() {
        let output = "\"C:\\proj\\main.c\",42  Error[Pe020]: identifier \"foo\" is undefined\n\
                      \"/proj/util.c\",7  Warning[Pe177]: variable \"x\" was declared but never referenced\n";
        let diags = backend().parse_diagnostics(output);
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].severity, Severity::Error);
        assert_eq!(diags[0].code.as_deref(), Some("Pe020"));
        assert_eq!(diags[0].line, Some(42));
        assert_eq!(diags[1].file, Some(PathBuf::from("/proj/util.c")));
        assert_eq!(diags[1].severity, Severity::Warning);
    }
}
