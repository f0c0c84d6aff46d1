use rustc_hash::FxHashMap;
use std::fs;
use std::path::Path;

use crate::program::{MethodId, Program};
use crate::Error;

/// Replaces call targets after virtual call resolution.
///
/// Library methods that are expensive or imprecise to analyse can be swapped
/// for hand written models. The table maps the signature of the resolved
/// target to the signature of its replacement.
#[derive(Clone, Debug, Default)]
pub struct MethodRemap {
    table: FxHashMap<String, String>,
}

impl MethodRemap {
    pub fn new() -> MethodRemap {
        MethodRemap::default()
    }

    /// Parses a remap table: one `source replacement` pair per line, `#`
    /// starts a comment.
    pub fn parse(text: &str) -> Result<MethodRemap, Error> {
        let mut remap = MethodRemap::new();
        for (number, line) in text.lines().enumerate() {
            let line = match line.find('#') {
                Some(position) => &line[..position],
                None => line,
            };
            let mut words = line.split_whitespace();
            match (words.next(), words.next(), words.next()) {
                (None, _, _) => continue,
                (Some(source), Some(replacement), None) => remap.insert(source, replacement),
                _ => {
                    return Err(format!(
                        "method remap line {}: expected `source replacement`",
                        number + 1
                    )
                    .into())
                }
            }
        }
        Ok(remap)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<MethodRemap, Error> {
        MethodRemap::parse(&fs::read_to_string(path)?)
    }

    pub fn insert<S: Into<String>, T: Into<String>>(&mut self, source: S, replacement: T) {
        self.table.insert(source.into(), replacement.into());
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The method a call to `target` should be redirected to.
    ///
    /// Returns `target` itself when it is not remapped, and `None` when the
    /// replacement is not part of the program.
    pub fn apply(&self, program: &Program, target: MethodId) -> Option<MethodId> {
        let signature = match program.methods.get(target.0) {
            Some(method) => &method.signature,
            None => return Some(target),
        };
        match self.table.get(signature) {
            None => Some(target),
            Some(replacement) => {
                let remapped = program.method_by_signature(replacement);
                if remapped.is_none() {
                    warn!(
                        "Replacement {} for {} is not in the program",
                        replacement, signature
                    );
                }
                remapped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::tests::sample_program;

    #[test]
    fn remap_targets() {
        let program = sample_program();
        let remap = MethodRemap::parse(
            "# models\n\
             helper:()V@Util   run:()V@T\n\
             run:()V@T missing:()V@Nowhere   # not analysed\n",
        )
        .unwrap();

        assert_eq!(remap.apply(&program, MethodId(2)), Some(MethodId(1)));
        assert_eq!(remap.apply(&program, MethodId(1)), None);
        assert_eq!(remap.apply(&program, MethodId(0)), Some(MethodId(0)));
    }

    #[test]
    fn malformed_line() {
        assert!(MethodRemap::parse("a b c").is_err());
        assert!(MethodRemap::parse("lonely").is_err());
        assert!(MethodRemap::parse("\n   \n# nothing\n").unwrap().is_empty());
    }
}
