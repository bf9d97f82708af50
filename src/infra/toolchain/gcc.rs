//! GNU Arm Embedded backend
//!
//! Drives `arm-none-eabi-gcc` for assembling, compiling and linking,
//! `arm-none-eabi-ar` for archives and `arm-none-eabi-objcopy` for binary
//! extraction.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use super::{
    parse_with, to_strings, CompileInput, Diagnostic, FlagSet, LinkInput, Profile, ToolCommand,
    Toolchain, ToolchainConfig,
};
use crate::core::target::Fpu;
use crate::error::BuildError;

/// Default executable prefix
pub const DEFAULT_PREFIX: &str = "arm-none-eabi-";

/// Libraries linked inside the start/end group
const SYS_LIBS: &[&str] = &["stdc++", "supc++", "m", "c", "gcc", "nosys"];

fn diagnostic_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<file>[^:\s][^:]*(?::\\[^:]*)?):(?P<line>\d+):(?:(?P<col>\d+):)?\s*(?P<severity>fatal error|error|warning|note):\s*(?P<message>.*)$",
        )
        .expect("valid diagnostic regex")
    })
}

/// Profile flags for GCC
fn profile_flags(profile: Profile) -> FlagSet {
    let mut common = to_strings(&[
        "-Wall",
        "-Wextra",
        "-Wno-unused-parameter",
        "-Wno-missing-field-initializers",
        "-fmessage-length=0",
        "-fno-exceptions",
        "-ffunction-sections",
        "-fdata-sections",
        "-funsigned-char",
        "-fomit-frame-pointer",
    ]);
    common.extend(to_strings(match profile {
        Profile::Debug => &["-O0", "-g3"],
        Profile::Develop => &["-Os", "-g1"],
        Profile::Release => &["-Os", "-DNDEBUG"],
    }));
    FlagSet {
        common,
        c: to_strings(&["-std=gnu11"]),
        cxx: to_strings(&["-std=gnu++14", "-fno-rtti", "-Wvla"]),
        asm: to_strings(&["-x", "assembler-with-cpp"]),
        ld: to_strings(&[
            "-Wl,--gc-sections",
            "-Wl,--wrap,main",
            "-Wl,-n",
            "--specs=nano.specs",
        ]),
    }
}

/// GNU Arm Embedded toolchain
#[derive(Debug, Clone)]
pub struct GccArm {
    cc: String,
    cxx: String,
    ar: String,
    objcopy: String,
    cpu_flags: Vec<String>,
    flags: FlagSet,
    response_files: bool,
}

impl GccArm {
    /// Create the backend from a resolved config
    pub fn new(config: &ToolchainConfig) -> Self {
        let prefix = config.prefix.as_deref().unwrap_or(DEFAULT_PREFIX);
        let mut flags = profile_flags(config.profile);
        flags.extend(&config.extra_flags);
        Self {
            cc: config.tool(&format!("{prefix}gcc")),
            cxx: config.tool(&format!("{prefix}g++")),
            ar: config.tool(&format!("{prefix}ar")),
            objcopy: config.tool(&format!("{prefix}objcopy")),
            cpu_flags: cpu_flags_for(config.core),
            flags,
            response_files: config.response_files,
        }
    }

    fn compile(&self, program: &str, lang_flags: &[String], input: &CompileInput<'_>) -> ToolCommand {
        let mut cmd = vec![program.to_string()];
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
                "-MMD".to_string(),
                "-MF".to_string(),
                dep_file.display().to_string(),
            ]);
        }
        cmd.extend([
            "-c".to_string(),
            "-o".to_string(),
            input.object.display().to_string(),
            input.source.display().to_string(),
        ]);
        cmd
    }
}

/// `-mcpu`, `-mthumb` and FPU flags for a core
pub fn cpu_flags_for(core: crate::core::target::Core) -> Vec<String> {
    let mut flags = vec![format!("-mcpu={}", core.cpu())];
    if core.is_cortex_m() {
        flags.push("-mthumb".to_string());
    } else {
        flags.extend(to_strings(&["-mthumb-interwork", "-marm"]));
    }
    let fpu: &[&str] = match core.fpu() {
        Fpu::None => &[],
        Fpu::SinglePrecisionV4 => &["-mfpu=fpv4-sp-d16", "-mfloat-abi=softfp"],
        Fpu::SinglePrecisionV5 => &["-mfpu=fpv5-sp-d16", "-mfloat-abi=softfp"],
        Fpu::DoublePrecisionV5 => &["-mfpu=fpv5-d16", "-mfloat-abi=softfp"],
        Fpu::Neon => &["-mfpu=vfpv3", "-mfloat-abi=hard"],
    };
    flags.extend(to_strings(fpu));
    flags
}

impl Toolchain for GccArm {
    fn name(&self) -> &'static str {
        "GCC_ARM"
    }

    fn labels(&self) -> &'static [&'static str] {
        &["GCC", "GCC_ARM"]
    }

    fn linker_script_ext(&self) -> &'static str {
        "ld"
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

    fn assemble(&self, input: &CompileInput<'_>) -> Vec<ToolCommand> {
        vec![self.compile(&self.cc, &self.flags.asm, input)]
    }

    fn compile_c(&self, input: &CompileInput<'_>) -> Vec<ToolCommand> {
        vec![self.compile(&self.cc, &self.flags.c, input)]
    }

    fn compile_cpp(&self, input: &CompileInput<'_>) -> Vec<ToolCommand> {
        vec![self.compile(&self.cxx, &self.flags.cxx, input)]
    }

    fn link(&self, input: &LinkInput<'_>) -> Vec<ToolCommand> {
        let mut cmd = vec![self.cxx.clone()];
        cmd.extend(self.flags.ld.iter().cloned());
        cmd.extend(self.cpu_flags.iter().cloned());
        cmd.extend(input.extra_args.iter().cloned());
        cmd.extend([
            "-T".to_string(),
            input.linker_script.display().to_string(),
            format!("-Wl,-Map={}", input.map_file.display()),
            "-o".to_string(),
            input.output.display().to_string(),
        ]);
        cmd.extend(input.object_args.iter().cloned());
        cmd.push("-Wl,--start-group".to_string());
        cmd.extend(input.libraries.iter().map(|l| l.display().to_string()));
        cmd.extend(SYS_LIBS.iter().map(|l| format!("-l{l}")));
        cmd.push("-Wl,--end-group".to_string());
        vec![cmd]
    }

    fn archive(&self, object_args: &[String], output: &Path) -> Vec<ToolCommand> {
        let mut cmd = vec![self.ar.clone(), "rcs".to_string(), output.display().to_string()];
        cmd.extend(object_args.iter().cloned());
        vec![cmd]
    }

    fn binary(&self, elf: &Path, output: &Path) -> ToolCommand {
        let format = if output.extension().is_some_and(|e| e == "hex") {
            "ihex"
        } else {
            "binary"
        };
        vec![
            self.objcopy.clone(),
            "-O".to_string(),
            format.to_string(),
            elf.display().to_string(),
            output.display().to_string(),
        ]
    }

    fn parse_diagnostics(&self, output: &str) -> Vec<Diagnostic> {
        parse_with(diagnostic_regex(), output)
    }

    fn redirect_symbol(&self, source: &str, target: &str, _build_dir: &Path) -> Result<Vec<String>, BuildError> {
        Ok(vec![format!("-Wl,--defsym={source}={target}")])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::target::Core;
    use crate::infra::toolchain::Severity;
    use std::path::PathBuf;

    fn backend() -> GccArm {
        GccArm::new(&ToolchainConfig::new(Core::CortexM4F).with_bin_dir("/opt/gcc/bin"))
    }

    #[test]
    fn test_cpu_flags_m4f() {
        let flags = cpu_flags_for(Core::CortexM4F);
        assert_eq!(
            flags,
            vec!["-mcpu=cortex-m4", "-mthumb", "-mfpu=fpv4-sp-d16", "-mfloat-abi=softfp"]
        );
    }

    #[test]
    fn test_cpu_flags_m0_has_no_fpu() {
        let flags = cpu_flags_for(Core::CortexM0);
        assert_eq!(flags, vec!["-mcpu=cortex-m0", "-mthumb"]);
    }

    #[test]
    fn test_compile_c_command_shape() {
        let defines = vec!["TARGET_K64F".to_string()];
        let includes = vec!["@/build/.includes_abc.txt".to_string()];
        let input = CompileInput {
            source: Path::new("/p/main.c"),
            object: Path::new("/b/main.o"),
            dep_file: Some(Path::new("/b/main.d")),
            defines: &defines,
            include_args: &includes,
            config_header: Some(Path::new("/b/firmforge_config.h")),
        };
        let cmds = backend().compile_c(&input);
        assert_eq!(cmds.len(), 1);
        let cmd = &cmds[0];
        assert_eq!(cmd[0], "/opt/gcc/bin/arm-none-eabi-gcc");
        assert!(cmd.contains(&"-DTARGET_K64F".to_string()));
        assert!(cmd.contains(&"-std=gnu11".to_string()));
        assert!(cmd.contains(&"@/build/.includes_abc.txt".to_string()));
        assert!(cmd.contains(&"-include".to_string()));
        assert_eq!(cmd.last().unwrap(), "/p/main.c");
    }

    #[test]
    fn test_link_uses_script_and_map() {
        let objects = vec!["/b/main.o".to_string()];
        let libs = vec![PathBuf::from("/b/libfoo.a")];
        let input = LinkInput {
            output: Path::new("/b/app.elf"),
            object_args: &objects,
            libraries: &libs,
            linker_script: Path::new("/p/K64F.ld"),
            map_file: Path::new("/b/app.map"),
            extra_args: &[],
        };
        let cmd = &backend().link(&input)[0];
        assert!(cmd.windows(2).any(|w| w[0] == "-T" && w[1] == "/p/K64F.ld"));
        assert!(cmd.contains(&"-Wl,-Map=/b/app.map".to_string()));
        assert!(cmd.contains(&"/b/libfoo.a".to_string()));
    }

    #[test]
    fn test_binary_format_from_extension() {
        let gcc = backend();
        let hex = gcc.binary(Path::new("a.elf"), Path::new("a.hex"));
        assert_eq!(hex[2], "ihex");
        let bin = gcc.binary(Path::new("a.elf"), Path::new("a.bin"));
        assert_eq!(bin[2], "binary");
    }

    #[test]
    fn test_parse_diagnostics() {
        let output = "main.c:12:5: warning: unused variable 'x' [-Wunused-variable]\n\
                      In file included from main.c:1:\n\
                      gpio.h:3:10: fatal error: missing.h: No such file or directory\n";
        let diags = backend().parse_diagnostics(output);
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].severity, Severity::Warning);
        assert_eq!(diags[0].file, Some(PathBuf::from("main.c")));
        assert_eq!(diags[0].line, Some(12));
        assert_eq!(diags[0].column, Some(5));
        assert_eq!(diags[1].severity, Severity::Error);
        assert_eq!(diags[1].message, "missing.h: No such file or directory");
    }

    #[test]
    fn test_mangle_and_redirect() {
        let gcc = backend();
        assert_eq!(gcc.mangle("main"), "_Z4mainv");
        assert_eq!(
            gcc.redirect_symbol("main", "_wrapped_main", Path::new("/b")).unwrap(),
            vec!["-Wl,--defsym=main=_wrapped_main"]
        );
    }

    #[test]
    fn test_profile_flags_debug_vs_release() {
        assert!(profile_flags(Profile::Debug).common.contains(&"-O0".to_string()));
        assert!(profile_flags(Profile::Release).common.contains(&"-Os".to_string()));
    }
}
