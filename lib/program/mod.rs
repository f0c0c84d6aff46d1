//! The program model analyses run over.
//!
//! The bytecode front end is not part of kestrel. It hands us a `Program`:
//! methods, instructions, variables, fields and types, each addressed by a
//! stable integer handle. Handles are plain indices into the `Program`'s
//! tables, so two instructions are the same instruction exactly when their
//! `InstId`s are equal, no matter how they print.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::Error;

mod remap;

pub use self::remap::MethodRemap;

macro_rules! handle {
    ($name:ident, $prefix:expr) => {
        #[derive(
            Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub usize);

        impl $name {
            pub fn index(&self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

handle!(MethodId, "m");
handle!(InstId, "i");
handle!(VarId, "v");
handle!(FieldId, "f");
handle!(TypeId, "t");

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Method {
    /// Fully qualified signature, such as `run:()V@java.lang.Thread`.
    pub signature: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_class_initializer: bool,
    #[serde(default)]
    pub is_abstract: bool,
    /// Reference-typed local variables. For instance methods the first one is
    /// `this`.
    #[serde(default)]
    pub variables: Vec<VarId>,
    #[serde(default)]
    pub instructions: Vec<InstId>,
}

impl Method {
    /// The receiver variable of an instance method.
    pub fn this_var(&self) -> Option<VarId> {
        if self.is_static {
            None
        } else {
            self.variables.first().cloned()
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstructionKind {
    /// A call. `targets` holds the resolved callees; virtual calls list every
    /// possible override.
    Invoke {
        targets: Vec<MethodId>,
        #[serde(default)]
        receiver: Option<VarId>,
    },
    New {
        result: VarId,
        #[serde(default)]
        class: Option<TypeId>,
    },
    NewArray {
        result: VarId,
    },
    FieldRead {
        base: VarId,
        field: FieldId,
    },
    FieldWrite {
        base: VarId,
        field: FieldId,
    },
    ArrayRead {
        base: VarId,
    },
    ArrayWrite {
        base: VarId,
    },
    StaticWrite {
        field: FieldId,
    },
    Lock {
        variable: VarId,
    },
    Cast {
        variable: VarId,
        target: TypeId,
    },
    Other,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Instruction {
    pub method: MethodId,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(flatten)]
    pub kind: InstructionKind,
}

impl Instruction {
    pub fn is_invoke(&self) -> bool {
        matches!(self.kind, InstructionKind::Invoke { .. })
    }

    pub fn is_alloc(&self) -> bool {
        matches!(
            self.kind,
            InstructionKind::New { .. } | InstructionKind::NewArray { .. }
        )
    }

    /// Instance field and array element accesses.
    pub fn is_heap_access(&self) -> bool {
        matches!(
            self.kind,
            InstructionKind::FieldRead { .. }
                | InstructionKind::FieldWrite { .. }
                | InstructionKind::ArrayRead { .. }
                | InstructionKind::ArrayWrite { .. }
        )
    }

    pub fn is_lock(&self) -> bool {
        matches!(self.kind, InstructionKind::Lock { .. })
    }

    /// The field accessed, `None` for array elements and non heap accesses.
    pub fn accessed_field(&self) -> Option<FieldId> {
        match self.kind {
            InstructionKind::FieldRead { field, .. } | InstructionKind::FieldWrite { field, .. } => {
                Some(field)
            }
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Variable {
    pub name: String,
    pub method: MethodId,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub class: Option<TypeId>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Type {
    pub name: String,
}

/// A whole program, as produced by the front end.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Program {
    pub main: Option<MethodId>,
    #[serde(default)]
    pub methods: Vec<Method>,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub types: Vec<Type>,
}

impl Program {
    /// Loads a JSON program model and checks that its handles are in range.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Program, Error> {
        let text = fs::read_to_string(path.as_ref())?;
        let program: Program = serde_json::from_str(&text)?;
        program.validate()?;
        info!(
            "Loaded program {}: {} methods, {} instructions",
            path.as_ref().display(),
            program.methods.len(),
            program.instructions.len()
        );
        Ok(program)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let check = |what: &str, index: usize, len: usize| -> Result<(), Error> {
            if index < len {
                Ok(())
            } else {
                Err(Error::InvalidProgram(format!(
                    "{} handle {} out of range ({} defined)",
                    what, index, len
                )))
            }
        };
        let methods = self.methods.len();
        let vars = self.variables.len();
        let fields = self.fields.len();
        let types = self.types.len();

        if let Some(main) = self.main {
            check("method", main.0, methods)?;
        }
        for method in &self.methods {
            for v in &method.variables {
                check("variable", v.0, vars)?;
            }
            for i in &method.instructions {
                check("instruction", i.0, self.instructions.len())?;
            }
        }
        for var in &self.variables {
            check("method", var.method.0, methods)?;
        }
        for inst in &self.instructions {
            check("method", inst.method.0, methods)?;
            match &inst.kind {
                InstructionKind::Invoke { targets, receiver } => {
                    for t in targets {
                        check("method", t.0, methods)?;
                    }
                    if let Some(r) = receiver {
                        check("variable", r.0, vars)?;
                    }
                }
                InstructionKind::New { result, class } => {
                    check("variable", result.0, vars)?;
                    if let Some(c) = class {
                        check("type", c.0, types)?;
                    }
                }
                InstructionKind::NewArray { result } => check("variable", result.0, vars)?,
                InstructionKind::FieldRead { base, field }
                | InstructionKind::FieldWrite { base, field } => {
                    check("variable", base.0, vars)?;
                    check("field", field.0, fields)?;
                }
                InstructionKind::ArrayRead { base } | InstructionKind::ArrayWrite { base } => {
                    check("variable", base.0, vars)?
                }
                InstructionKind::StaticWrite { field } => check("field", field.0, fields)?,
                InstructionKind::Lock { variable } => check("variable", variable.0, vars)?,
                InstructionKind::Cast { variable, target } => {
                    check("variable", variable.0, vars)?;
                    check("type", target.0, types)?;
                }
                InstructionKind::Other => {}
            }
        }
        Ok(())
    }

    pub fn method(&self, m: MethodId) -> Result<&Method, Error> {
        self.methods
            .get(m.0)
            .ok_or_else(|| Error::InvalidProgram(format!("no method {}", m)))
    }

    pub fn instruction(&self, i: InstId) -> Result<&Instruction, Error> {
        self.instructions
            .get(i.0)
            .ok_or_else(|| Error::InvalidProgram(format!("no instruction {}", i)))
    }

    pub fn variable(&self, v: VarId) -> Result<&Variable, Error> {
        self.variables
            .get(v.0)
            .ok_or_else(|| Error::InvalidProgram(format!("no variable {}", v)))
    }

    pub fn field(&self, f: FieldId) -> Result<&Field, Error> {
        self.fields
            .get(f.0)
            .ok_or_else(|| Error::InvalidProgram(format!("no field {}", f)))
    }

    pub fn type_(&self, t: TypeId) -> Result<&Type, Error> {
        self.types
            .get(t.0)
            .ok_or_else(|| Error::InvalidProgram(format!("no type {}", t)))
    }

    pub fn method_ids(&self) -> impl Iterator<Item = MethodId> {
        (0..self.methods.len()).map(MethodId)
    }

    /// Every instruction paired with its handle.
    pub fn instructions(&self) -> impl Iterator<Item = (InstId, &Instruction)> {
        self.instructions
            .iter()
            .enumerate()
            .map(|(i, inst)| (InstId(i), inst))
    }

    /// Looks a method up by its signature.
    pub fn method_by_signature(&self, signature: &str) -> Option<MethodId> {
        self.methods
            .iter()
            .position(|m| m.signature == signature)
            .map(MethodId)
    }

    /// The roots of the call graph: the entry method and every class
    /// initializer.
    pub fn roots(&self) -> Vec<MethodId> {
        let mut roots: Vec<MethodId> = self.main.into_iter().collect();
        for (i, method) in self.methods.iter().enumerate() {
            if method.is_class_initializer && Some(MethodId(i)) != self.main {
                roots.push(MethodId(i));
            }
        }
        roots
    }

    /// XML attributes describing a method, for reports.
    pub fn method_xml_attrs(&self, m: MethodId) -> String {
        match self.methods.get(m.0) {
            Some(method) => format!(
                "sign=\"{}\" file=\"{}\" line=\"{}\"",
                xml_escape(&method.signature),
                method.file.as_deref().unwrap_or(""),
                method.line.map(|l| l.to_string()).unwrap_or_default()
            ),
            None => String::new(),
        }
    }

    /// XML attributes describing an instruction, for reports.
    pub fn instruction_xml_attrs(&self, i: InstId) -> String {
        match self.instructions.get(i.0) {
            Some(inst) => format!(
                "line=\"{}\" Mid=\"M{}\"",
                inst.line.map(|l| l.to_string()).unwrap_or_default(),
                inst.method.0
            ),
            None => String::new(),
        }
    }

    /// A short human readable description of an instruction.
    pub fn describe_instruction(&self, i: InstId) -> String {
        match self.instructions.get(i.0) {
            Some(inst) => {
                let method = self
                    .methods
                    .get(inst.method.0)
                    .map(|m| m.signature.as_str())
                    .unwrap_or("?");
                match inst.line {
                    Some(line) => format!("{}@{}", line, method),
                    None => format!("?@{}", method),
                }
            }
            None => format!("{}", i),
        }
    }
}

pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
