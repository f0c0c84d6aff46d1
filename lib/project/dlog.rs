use std::fs;
use std::path::{Path, PathBuf};

use crate::project::{Project, Task};
use crate::store::{major_name, RelSign};
use crate::Error;

/// A task defined by a Datalog program and evaluated by the solver.
///
/// The header of the program names the task and declares its relations:
///
/// ```text
/// # name=cipa-0cfa-dlog
/// .bddvarorder I0xM0_V0_H0
/// IM(i:I,m:M) input
/// VH(v:V0,h:H0) output
/// ```
///
/// The task consumes the domains of all declared relations and the `input`
/// relations, and produces the `output` relations. Columns whose domain has
/// no numeric suffix are numbered in order of appearance within the
/// relation.
#[derive(Clone, Debug)]
pub struct DlogTask {
    name: String,
    file: PathBuf,
    order: Option<String>,
    doms: Vec<String>,
    inputs: Vec<(String, RelSign)>,
    outputs: Vec<(String, RelSign)>,
}

struct Declaration {
    line: usize,
    name: String,
    doms: Vec<String>,
    output: bool,
}

impl DlogTask {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<DlogTask, Error> {
        let text = fs::read_to_string(path.as_ref())?;
        DlogTask::parse(path.as_ref(), &text)
    }

    pub fn parse(file: &Path, text: &str) -> Result<DlogTask, Error> {
        let parse_error = |line: usize, message: String| Error::DatalogParse {
            file: file.display().to_string(),
            line,
            message,
        };

        let mut name = None;
        let mut order = None;
        let mut declarations = Vec::new();

        for (number, line) in text.lines().enumerate() {
            let number = number + 1;
            let line = line.trim();
            if let Some(comment) = line.strip_prefix('#') {
                if let Some(value) = comment.trim().strip_prefix("name=") {
                    name = Some(value.trim().to_string());
                }
                continue;
            }
            if let Some(value) = line.strip_prefix(".bddvarorder") {
                order = Some(value.trim().to_string());
                continue;
            }
            if line.is_empty() || line.starts_with('.') || line.contains(":-") {
                continue;
            }
            if let Some(declaration) = parse_declaration(line)
                .map_err(|message| parse_error(number, message))?
            {
                declarations.push(Declaration {
                    line: number,
                    ..declaration
                });
            }
        }

        let name =
            name.ok_or_else(|| parse_error(1, "missing `# name=` header".to_string()))?;

        let mut doms: Vec<String> = Vec::new();
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for declaration in declarations {
            let relation_order = match &order {
                Some(order) => sub_order(order, &declaration.doms).ok_or_else(|| {
                    parse_error(
                        declaration.line,
                        format!(
                            "variable order {} does not cover the columns of {}",
                            order, declaration.name
                        ),
                    )
                })?,
                None => declaration.doms.join("_"),
            };
            let sign = RelSign::new(&declaration.doms, &relation_order)
                .map_err(|e| parse_error(declaration.line, e.to_string()))?;
            for dom in sign.major_doms() {
                if !doms.iter().any(|d| d == dom) {
                    doms.push(dom.to_string());
                }
            }
            if declaration.output {
                outputs.push((declaration.name, sign));
            } else {
                inputs.push((declaration.name, sign));
            }
        }

        Ok(DlogTask {
            name,
            file: file.to_path_buf(),
            order,
            doms,
            inputs,
            outputs,
        })
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn order(&self) -> Option<&str> {
        self.order.as_deref()
    }

    pub fn doms(&self) -> &[String] {
        &self.doms
    }

    pub fn inputs(&self) -> &[(String, RelSign)] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[(String, RelSign)] {
        &self.outputs
    }
}

/// Parses `R(x:A0,y:B)input`. Returns `None` for lines that are not
/// declarations, such as facts and rules.
fn parse_declaration(line: &str) -> Result<Option<Declaration>, String> {
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    let (output, head) = if let Some(head) = compact.strip_suffix("output") {
        (true, head)
    } else if let Some(head) = compact.strip_suffix("input") {
        (false, head)
    } else {
        return Ok(None);
    };
    let open = match head.find('(') {
        Some(open) => open,
        None => return Ok(None),
    };
    let name = &head[..open];
    let columns = head[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| format!("malformed relation declaration `{}`", line))?;
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(format!("bad relation name in `{}`", line));
    }

    let mut doms: Vec<String> = Vec::new();
    for column in columns.split(',') {
        let (_, dom) = column
            .split_once(':')
            .ok_or_else(|| format!("column `{}` of {} has no domain", column, name))?;
        if dom.is_empty() || !dom.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(format!("bad domain `{}` in {}", dom, name));
        }
        let minor = if major_name(dom).len() == dom.len() {
            let mut suffix = 0;
            while doms.iter().any(|d| *d == format!("{}{}", dom, suffix)) {
                suffix += 1;
            }
            format!("{}{}", dom, suffix)
        } else {
            dom.to_string()
        };
        if doms.contains(&minor) {
            return Err(format!("domain {} used twice in {}", minor, name));
        }
        doms.push(minor);
    }

    Ok(Some(Declaration {
        line: 0,
        name: name.to_string(),
        doms,
        output,
    }))
}

/// Restricts a program-wide variable order to the given columns, keeping
/// the interleaving (`x`) and sequencing (`_`) of the full order.
fn sub_order(order: &str, doms: &[String]) -> Option<String> {
    let mut groups = Vec::new();
    let mut covered = 0;
    for group in order.split('_') {
        let members: Vec<&str> = group
            .split('x')
            .filter(|name| doms.iter().any(|d| d == name))
            .collect();
        covered += members.len();
        if !members.is_empty() {
            groups.push(members.join("x"));
        }
    }
    if covered == doms.len() {
        Some(groups.join("_"))
    } else {
        None
    }
}

impl Task for DlogTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn consumes(&self) -> Vec<String> {
        self.doms
            .iter()
            .cloned()
            .chain(self.inputs.iter().map(|(name, _)| name.clone()))
            .collect()
    }

    fn produces(&self) -> Vec<String> {
        self.outputs.iter().map(|(name, _)| name.clone()).collect()
    }

    fn signatures(&self) -> Vec<(String, RelSign)> {
        self.inputs.iter().chain(&self.outputs).cloned().collect()
    }

    fn run(&mut self, project: &mut Project) -> Result<(), Error> {
        for (name, _) in &self.outputs {
            project.store_mut().close_relation(name)?;
        }
        project.solve(&self.file)
    }
}
