//! Configuration of a compilation run.

use std::collections::BTreeSet;

use crate::{compiler::target::InstructionSet, Error, Result};

/// What kind of artifact the run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompilationMode {
    /// Compiling the boot image itself; classes may be pre-initialized
    BootImage,
    /// Compiling application code against an existing boot image
    #[default]
    Application,
}

/// Profile-driven skip policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileOptions {
    /// Methods whose used-percent is below this value are skipped
    pub threshold_percent: f64,
    /// Also skip methods that do not appear in a loaded profile
    pub skip_unlisted: bool,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            threshold_percent: 1.0,
            skip_unlisted: false,
        }
    }
}

/// Options of a compilation run
///
/// Use one of the presets and adjust individual fields as needed.
///
/// ```rust
/// use aotscope::compiler::{CompilerOptions, InstructionSet};
///
/// let mut options = CompilerOptions::application(InstructionSet::Arm64);
/// options.thread_count = 4;
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[allow(clippy::struct_excessive_bools)]
pub struct CompilerOptions {
    /// Boot image or application compilation
    pub mode: CompilationMode,

    /// Instruction set of the generated code
    pub instruction_set: InstructionSet,

    /// Number of worker threads, 0 lets the pool pick one per core
    pub thread_count: usize,

    /// Descriptors of the classes that go into the boot image (boot image mode only)
    /// `None` puts every compiled class into the image
    pub image_classes: Option<BTreeSet<String>>,

    /// Sharpen virtual calls into direct calls where the target is provably fixed
    pub enable_devirtualization: bool,

    /// The image writer can patch pc-relative references into the boot image
    pub support_boot_image_fixup: bool,

    /// Profile-driven skip policy
    pub profile: ProfileOptions,

    /// Log the run summary and fast-path statistics when the run ends
    pub dump_stats: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self::application(InstructionSet::default())
    }
}

impl CompilerOptions {
    /// Creates options for compiling application code.
    #[must_use]
    pub fn application(instruction_set: InstructionSet) -> Self {
        Self {
            mode: CompilationMode::Application,
            instruction_set,
            thread_count: 0,
            image_classes: None,
            enable_devirtualization: true,
            support_boot_image_fixup: true,
            profile: ProfileOptions::default(),
            dump_stats: false,
        }
    }

    /// Creates options for compiling a boot image.
    ///
    /// `image_classes` restricts pre-initialization and the image-class queries to the given
    /// descriptors; pass `None` to treat every class as an image class.
    #[must_use]
    pub fn boot_image(
        instruction_set: InstructionSet,
        image_classes: Option<BTreeSet<String>>,
    ) -> Self {
        Self {
            mode: CompilationMode::BootImage,
            image_classes,
            ..Self::application(instruction_set)
        }
    }

    /// Returns true when compiling the boot image.
    #[must_use]
    pub fn is_boot_image(&self) -> bool {
        self.mode == CompilationMode::BootImage
    }

    /// Checks the options for combinations that cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if an image-class set is given outside boot image mode or
    /// the profile threshold is not a percentage.
    pub fn validate(&self) -> Result<()> {
        if self.image_classes.is_some() && !self.is_boot_image() {
            return Err(Error::Configuration(
                "image classes require boot image mode".to_string(),
            ));
        }
        let threshold = self.profile.threshold_percent;
        if !(0.0..=100.0).contains(&threshold) {
            return Err(Error::Configuration(format!(
                "profile threshold {threshold} is not a percentage"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let app = CompilerOptions::application(InstructionSet::X86_64);
        assert!(!app.is_boot_image());
        assert_eq!(app.instruction_set, InstructionSet::X86_64);
        assert!(app.validate().is_ok());

        let classes: BTreeSet<String> = ["LFoo;".to_string()].into_iter().collect();
        let image = CompilerOptions::boot_image(InstructionSet::Thumb2, Some(classes));
        assert!(image.is_boot_image());
        assert!(image.validate().is_ok());
    }

    #[test]
    fn test_default_is_application() {
        let options = CompilerOptions::default();
        assert_eq!(options.mode, CompilationMode::Application);
        assert_eq!(options.thread_count, 0);
        assert!(options.enable_devirtualization);
    }

    #[test]
    fn test_validate_rejects_image_classes_for_applications() {
        let mut options = CompilerOptions::application(InstructionSet::Arm64);
        options.image_classes = Some(BTreeSet::new());
        assert!(matches!(options.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut options = CompilerOptions::default();
        options.profile.threshold_percent = 150.0;
        assert!(matches!(options.validate(), Err(Error::Configuration(_))));

        options.profile.threshold_percent = f64::NAN;
        assert!(options.validate().is_err());
    }
}
