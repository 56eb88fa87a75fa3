use std::fmt;

use crate::syntax::{Instruction, Variable};

/// A built program: declared inputs followed by instructions in execution order.
#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub(crate) name: String,
    pub(crate) inputs: Vec<Variable>,
    pub(crate) instructions: Vec<Instruction>,
}

impl Program {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[Variable] {
        &self.inputs
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Look up an input or instruction output by name.
    pub fn variable(&self, id: &str) -> Option<&Variable> {
        self.inputs.iter().find(|v| v.id == id).or_else(|| {
            self.instructions
                .iter()
                .flat_map(|i| i.outputs.iter())
                .find(|v| v.id == id)
        })
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ins: Vec<String> = self.inputs.iter().map(|v| v.to_string()).collect();
        writeln!(f, "program {}({}) {{", self.name, ins.join(", "))?;
        for instr in &self.instructions {
            writeln!(f, "  {instr}")?;
        }
        f.write_str("}")
    }
}
