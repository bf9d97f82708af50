//! Arm Compiler 6 backend
//!
//! C and C++ go through `armclang`. Assembly is preprocessed by `armclang -E`
//! and then assembled by `armasm`, so one source yields two commands. Linking
//! uses `armlink` with a scatter file, archives `armar` and binary extraction
//! `fromelf`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use super::{
    parse_with, to_strings, CompileInput, Diagnostic, FlagSet, LinkInput, Profile, ToolCommand,
    Toolchain, ToolchainConfig,
};
use crate::core::target::{Core, Fpu};
use crate::error::BuildError;

/// Steering file collecting symbol renames
const STEERING_FILE: &str = ".link_steering.txt";

fn compiler_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<file>[^:\s][^:]*(?::\\[^:]*)?):(?P<line>\d+):(?:(?P<col>\d+):)?\s*(?P<severity>fatal error|error|warning|note):\s*(?P<message>.*)$",
        )
        .expect("valid diagnostic regex")
    })
}

fn linker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<severity>Fatal error|Error|Warning):\s*(?P<code>[LA]\d+[EWU]):\s*(?P<message>.*)$")
            .expect("valid diagnostic regex")
    })
}

/// `--cpu` value understood by armasm and armlink
fn legacy_cpu(core: Core) -> &'static str {
    match core {
        Core::CortexM0 => "Cortex-M0",
        Core::CortexM0Plus => "Cortex-M0plus",
        Core::CortexM3 => "Cortex-M3",
        Core::CortexM4 => "Cortex-M4.no_fp",
        Core::CortexM4F => "Cortex-M4.fp.sp",
        Core::CortexM7 => "Cortex-M7.no_fp",
        Core::CortexM7F => "Cortex-M7.fp.sp",
        Core::CortexM7FD => "Cortex-M7.fp.dp",
        Core::CortexM23 => "Cortex-M23",
        Core::CortexM33 => "Cortex-M33.no_fp",
        Core::CortexM33F => "Cortex-M33",
        Core::CortexA9 => "Cortex-A9",
    }
}

/// armclang target and FPU flags for a core
pub fn cpu_flags_for(core: Core) -> Vec<String> {
    let target = if core.is_cortex_m() {
        "--target=arm-arm-none-eabi"
    } else {
        "--target=armv7a-arm-none-eabi"
    };
    let mut flags = vec![target.to_string(), format!("-mcpu={}", core.cpu())];
    let fpu: &[&str] = match core.fpu() {
        Fpu::None => &["-mfpu=none"],
        Fpu::SinglePrecisionV4 => &["-mfpu=fpv4-sp-d16", "-mfloat-abi=hard"],
        Fpu::SinglePrecisionV5 => &["-mfpu=fpv5-sp-d16", "-mfloat-abi=hard"],
        Fpu::DoublePrecisionV5 => &["-mfpu=fpv5-d16", "-mfloat-abi=hard"],
        Fpu::Neon => &["-mfpu=neon", "-mfloat-abi=hard"],
    };
    flags.extend(to_strings(fpu));
    flags
}

fn profile_flags(profile: Profile) -> FlagSet {
    let mut common = to_strings(&[
        "-c",
        "-fshort-enums",
        "-fshort-wchar",
        "-funsigned-char",
        "-fno-exceptions",
        "-ffunction-sections",
        "-fdata-sections",
        "-Wno-armcc-pragma-push-pop",
        "-Wno-armcc-pragma-anon-unions",
    ]);
    common.extend(to_strings(match profile {
        Profile::Debug => &["-O0", "-g"],
        Profile::Develop => &["-Os"],
        Profile::Release => &["-Oz", "-DNDEBUG"],
    }));
    FlagSet {
        common,
        c: to_strings(&["-std=gnu11"]),
        cxx: to_strings(&["-std=gnu++14", "-fno-rtti", "-fno-c++-static-destructors"]),
        asm: Vec::new(),
        ld: to_strings(&["--verbose", "--remove", "--show_full_path", "--legacyalign"]),
    }
}

/// Arm Compiler 6
#[derive(Debug, Clone)]
pub struct ArmCompiler {
    armclang: String,
    armasm: String,
    armlink: String,
    armar: String,
    fromelf: String,
    cpu_flags: Vec<String>,
    legacy_cpu: &'static str,
    flags: FlagSet,
    response_files: bool,
}

impl ArmCompiler {
    /// Create the backend from a resolved config
    pub fn new(config: &ToolchainConfig) -> Self {
        let prefix = config.prefix.as_deref().unwrap_or_default();
        let mut flags = profile_flags(config.profile);
        flags.extend(&config.extra_flags);
        Self {
            armclang: config.tool(&format!("{prefix}armclang")),
            armasm: config.tool(&format!("{prefix}armasm")),
            armlink: config.tool(&format!("{prefix}armlink")),
            armar: config.tool(&format!("{prefix}armar")),
            fromelf: config.tool(&format!("{prefix}fromelf")),
            cpu_flags: cpu_flags_for(config.core),
            legacy_cpu: legacy_cpu(config.core),
            flags,
            response_files: config.response_files,
        }
    }

    /// armclang invocation up to (excluding) output and input
    fn clang(&self, lang_flags: &[String], input: &CompileInput<'_>) -> ToolCommand {
        let mut cmd = vec![self.armclang.clone()];
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
                "-MD".to_string(),
                "-MF".to_string(),
                dep_file.display().to_string(),
            ]);
        }
        cmd
    }

    fn compile(&self, lang_flags: &[String], input: &CompileInput<'_>) -> Vec<ToolCommand> {
        let mut cmd = self.clang(lang_flags, input);
        cmd.extend([
            "-o".to_string(),
            input.object.display().to_string(),
            input.source.display().to_string(),
        ]);
        vec![cmd]
    }
}

impl Toolchain for ArmCompiler {
    fn name(&self) -> &'static str {
        "ARM"
    }

    fn labels(&self) -> &'static [&'static str] {
        &["ARM", "ARMC6"]
    }

    fn linker_script_ext(&self) -> &'static str {
        "sct"
    }

    fn archive_ext(&self) -> &'static str {
        "ar"
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

    fn object_list_args(&self, path: &Path) -> Vec<String> {
        vec![format!("--via={}", path.display())]
    }

    fn assemble(&self, input: &CompileInput<'_>) -> Vec<ToolCommand> {
        let preprocessed: PathBuf = input.object.with_extension("E.s");
        let mut preprocess = self.clang(&to_strings(&["-x", "assembler-with-cpp"]), input);
        preprocess.retain(|arg| arg != "-c");
        preprocess.extend([
            "-E".to_string(),
            "-o".to_string(),
            preprocessed.display().to_string(),
            input.source.display().to_string(),
        ]);

        let mut assemble = vec![self.armasm.clone(), format!("--cpu={}", self.legacy_cpu)];
        assemble.extend(self.flags.asm.iter().cloned());
        assemble.extend([
            "-o".to_string(),
            input.object.display().to_string(),
            preprocessed.display().to_string(),
        ]);
        vec![preprocess, assemble]
    }

    fn compile_c(&self, input: &CompileInput<'_>) -> Vec<ToolCommand> {
        self.compile(&self.flags.c, input)
    }

    fn compile_cpp(&self, input: &CompileInput<'_>) -> Vec<ToolCommand> {
        self.compile(&self.flags.cxx, input)
    }

    fn link(&self, input: &LinkInput<'_>) -> Vec<ToolCommand> {
        let mut cmd = vec![self.armlink.clone(), format!("--cpu={}", self.legacy_cpu)];
        cmd.extend(self.flags.ld.iter().cloned());
        cmd.extend(input.extra_args.iter().cloned());
        cmd.extend([
            "--scatter".to_string(),
            input.linker_script.display().to_string(),
            "--info=summarysizes".to_string(),
            "--map".to_string(),
            format!("--list={}", input.map_file.display()),
            "-o".to_string(),
            input.output.display().to_string(),
        ]);
        cmd.extend(input.object_args.iter().cloned());
        cmd.extend(input.libraries.iter().map(|l| l.display().to_string()));
        vec![cmd]
    }

    fn archive(&self, object_args: &[String], output: &Path) -> Vec<ToolCommand> {
        let mut cmd = vec![
            self.armar.clone(),
            "-r".to_string(),
            "-c".to_string(),
            output.display().to_string(),
        ];
        cmd.extend(object_args.iter().cloned());
        vec![cmd]
    }

    fn binary(&self, elf: &Path, output: &Path) -> ToolCommand {
        let format = if output.extension().is_some_and(|e| e == "hex") {
            "--i32combined"
        } else {
            "--bin"
        };
        vec![
            self.fromelf.clone(),
            format.to_string(),
            "-o".to_string(),
            output.display().to_string(),
            elf.display().to_string(),
        ]
    }

    fn parse_diagnostics(&self, output: &str) -> Vec<Diagnostic> {
        let mut diagnostics = parse_with(compiler_regex(), output);
        diagnostics.extend(parse_with(linker_regex(), output));
        diagnostics
    }

    /// armlink has no single-flag alias; renames go through a steering file
    fn redirect_symbol(&self, source: &str, target: &str, build_dir: &Path) -> Result<Vec<String>, BuildError> {
        let path = build_dir.join(STEERING_FILE);
        let io_err = |e: std::io::Error| BuildError::Io {
            path: path.clone(),
            error: e.to_string(),
        };
        let line = format!("RENAME {source} AS {target}");
        let existing = std::fs::read_to_string(&path).unwrap_or_default();
        if !existing.lines().any(|l| l == line) {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(io_err)?;
            writeln!(file, "{line}").map_err(io_err)?;
        }
        Ok(vec![format!("--edit={}", path.display())])
    }
}
