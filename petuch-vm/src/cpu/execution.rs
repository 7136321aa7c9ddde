use super::core::Cpu;
use super::types::Trap;
use crate::bus::Bus;
use crate::decoder::{self, Condition, Format, Instruction, Opcode, OperandSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl AluOp {
    /// `None` only for division by zero.
    fn apply(self, a: u32, b: u32) -> Option<u32> {
        Some(match self {
            AluOp::Add => a.wrapping_add(b),
            AluOp::Sub => a.wrapping_sub(b),
            AluOp::Mul => a.wrapping_mul(b),
            AluOp::Div => return a.checked_div(b),
            AluOp::And => a & b,
            AluOp::Or => a | b,
            AluOp::Xor => a ^ b,
            AluOp::Shl => a.checked_shl(b).unwrap_or(0),
            AluOp::Shr => a.checked_shr(b).unwrap_or(0),
        })
    }
}

impl Cpu {
    /// Execute one instruction.
    ///
    /// A queued device interrupt is delivered first. A trap raised by the
    /// instruction rolls the CPU back to its state before the instruction
    /// and is delivered as an interrupt, so the saved return address is the
    /// faulting instruction. When the fault cannot be delivered (masked, or
    /// the frame push faulted too) the instruction is replayed with every
    /// missing translation resolving to physical 0. Halted CPUs do nothing.
    pub fn step(&mut self, bus: &mut dyn Bus) {
        if self.halted {
            return;
        }

        if let Some(vector) = bus.take_irq() {
            self.raise(bus, vector);
        }

        let checkpoint = self.clone();
        if let Err(trap) = self.execute_next(bus) {
            log::warn!("[CPU] {} at ip={:#010x}", trap, checkpoint.ip);
            *self = checkpoint;
            if !self.raise(bus, trap.vector()) {
                if let Err(trap) = self.with_fault_fallback(|cpu| cpu.execute_next(bus)) {
                    log::error!("[CPU] {} during fault replay at ip={:#010x}", trap, self.ip);
                }
            }
        }
    }

    fn execute_next(&mut self, bus: &mut dyn Bus) -> Result<(), Trap> {
        let word = self.read(bus, self.ip, OperandSize::Word)? as u16;
        let Some(insn) = decoder::decode(word) else {
            log::warn!(
                "[CPU] Unknown opcode {} (word {:#06x}) at {:#010x}",
                decoder::opcode_bits(word),
                word,
                self.ip
            );
            self.ip = self.ip.wrapping_add(2);
            return Ok(());
        };

        if insn.reserved != 0 {
            log::warn!(
                "[CPU] Reserved bits {:#x} set in {} at {:#010x}",
                insn.reserved,
                insn,
                self.ip
            );
        }
        let sized = matches!(
            insn.opcode.format(),
            Format::Type1 | Format::Type2 | Format::Type3 | Format::Type6
        );
        if sized && insn.size_code == 3 {
            log::warn!(
                "[CPU] Malformed operand size in {} at {:#010x}, using DWORD",
                insn,
                self.ip
            );
        }
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("[CPU] {:#010x}: {}", self.ip, insn);
        }

        self.execute(bus, &insn)
    }

    fn execute(&mut self, bus: &mut dyn Bus, insn: &Instruction) -> Result<(), Trap> {
        let ip = self.ip;
        let (d, s) = (insn.dest, insn.src);
        let size = insn.size();
        let next = ip.wrapping_add(2);
        let next_imm = ip.wrapping_add(insn.len_with_immediate());

        match insn.opcode {
            Opcode::Nop => self.ip = next,

            Opcode::Add0 => self.alu_reg(insn, AluOp::Add),
            Opcode::Sub0 => self.alu_reg(insn, AluOp::Sub),
            Opcode::Mul0 => self.alu_reg(insn, AluOp::Mul),
            Opcode::Div0 => self.alu_reg(insn, AluOp::Div),
            Opcode::And0 => self.alu_reg(insn, AluOp::And),
            Opcode::Or0 => self.alu_reg(insn, AluOp::Or),
            Opcode::Xor0 => self.alu_reg(insn, AluOp::Xor),

            Opcode::Add3 => self.alu_imm(bus, insn, AluOp::Add)?,
            Opcode::Sub3 => self.alu_imm(bus, insn, AluOp::Sub)?,
            Opcode::Mul3 => self.alu_imm(bus, insn, AluOp::Mul)?,
            Opcode::Div3 => self.alu_imm(bus, insn, AluOp::Div)?,
            Opcode::And3 => self.alu_imm(bus, insn, AluOp::And)?,
            Opcode::Or3 => self.alu_imm(bus, insn, AluOp::Or)?,
            Opcode::Xor3 => self.alu_imm(bus, insn, AluOp::Xor)?,
            Opcode::Shl => self.alu_imm(bus, insn, AluOp::Shl)?,
            Opcode::Shr => self.alu_imm(bus, insn, AluOp::Shr)?,

            Opcode::Not => {
                self.regs[d] = !self.regs[d];
                self.ip = next;
            }
            Opcode::Inc => {
                self.regs[d] = self.regs[d].wrapping_add(1);
                self.ip = next;
            }
            Opcode::Dec => {
                self.regs[d] = self.regs[d].wrapping_sub(1);
                self.ip = next;
            }
            Opcode::Cpy => {
                self.regs[d] = self.regs[s];
                self.ip = next;
            }
            Opcode::Swp => {
                self.regs.swap(d, s);
                self.ip = next;
            }

            Opcode::Push4 => {
                self.push(bus, self.regs[d])?;
                self.ip = next;
            }
            Opcode::Push2 => {
                let value = self.immediate(bus, size)?;
                self.push(bus, value)?;
                self.ip = next_imm;
            }
            Opcode::Pop4 => {
                self.regs[d] = self.pop(bus)?;
                self.ip = next;
            }

            Opcode::Jmp => {
                if self.branch_taken(insn) {
                    self.ip = self.immediate(bus, size)?;
                } else {
                    self.ip = next_imm;
                }
            }
            Opcode::Call => {
                if self.branch_taken(insn) {
                    let target = self.immediate(bus, size)?;
                    self.push(bus, next_imm)?;
                    self.ip = target;
                } else {
                    self.ip = next_imm;
                }
            }
            Opcode::Ret => self.ip = self.pop(bus)?,
            Opcode::Int => {
                let vector = self.immediate(bus, OperandSize::Byte)? as u8;
                // Masked: nothing changes, including ip.
                self.raise(bus, vector);
            }
            Opcode::Iret => self.iret(bus)?,
            Opcode::Hlt => {
                log::info!("[CPU] Halted at {:#010x}", ip);
                self.halted = true;
            }

            Opcode::Ld1 => {
                let ptr = self.immediate(bus, OperandSize::Dword)?;
                self.regs[d] = self.read(bus, ptr, size)?;
                self.ip = ip.wrapping_add(6);
            }
            Opcode::Ld3 => {
                self.regs[d] = self.immediate(bus, size)?;
                self.ip = next_imm;
            }
            Opcode::Ld6 => {
                self.regs[d] = self.read(bus, self.regs[s], size)?;
                self.ip = next;
            }
            Opcode::St1 => {
                let ptr = self.immediate(bus, OperandSize::Dword)?;
                self.write(bus, ptr, size, self.regs[d])?;
                self.ip = ip.wrapping_add(6);
            }
            Opcode::St6 => {
                self.write(bus, self.regs[d], size, self.regs[s])?;
                self.ip = next;
            }

            Opcode::Cmp0 => {
                self.compare(self.regs[d], self.regs[s]);
                self.ip = next;
            }
            Opcode::Cmp3 => {
                let value = self.immediate(bus, size)?;
                self.compare(self.regs[d], value);
                self.ip = next_imm;
            }

            Opcode::Ldsp => {
                self.sp = self.regs[d];
                self.ip = next;
            }
            Opcode::Stsp => {
                self.regs[d] = self.sp;
                self.ip = next;
            }
            Opcode::Ldit => {
                self.it = self.regs[d];
                self.ip = next;
            }
            Opcode::Stit => {
                self.regs[d] = self.it;
                self.ip = next;
            }
            Opcode::Ldmsr => {
                self.msr = self.regs[d];
                self.ip = next;
            }
            Opcode::Stmsr => {
                self.regs[d] = self.msr;
                self.ip = next;
            }
            Opcode::Ldpd => {
                self.pd = self.regs[d];
                self.ip = next;
            }
            Opcode::Stpd => {
                self.regs[d] = self.pd;
                self.ip = next;
            }
        }
        Ok(())
    }

    fn alu_reg(&mut self, insn: &Instruction, op: AluOp) {
        self.alu_store(insn, op, self.regs[insn.src]);
        self.ip = self.ip.wrapping_add(2);
    }

    fn alu_imm(&mut self, bus: &mut dyn Bus, insn: &Instruction, op: AluOp) -> Result<(), Trap> {
        let value = self.immediate(bus, insn.size())?;
        self.alu_store(insn, op, value);
        self.ip = self.ip.wrapping_add(insn.len_with_immediate());
        Ok(())
    }

    fn alu_store(&mut self, insn: &Instruction, op: AluOp, rhs: u32) {
        let d = insn.dest;
        match op.apply(self.regs[d], rhs) {
            Some(result) => self.regs[d] = result,
            None => log::warn!(
                "[CPU] Division by zero in {} at {:#010x}, r{} unchanged",
                insn,
                self.ip,
                d
            ),
        }
    }

    fn compare(&mut self, lhs: u32, rhs: u32) {
        let x = lhs.wrapping_sub(rhs);
        self.flags.zero = x == 0;
        self.flags.negative = (x as i32) < 0;
    }

    fn branch_taken(&self, insn: &Instruction) -> bool {
        match insn.condition() {
            Some(Condition::Always) => true,
            Some(Condition::Eq) => self.flags.zero,
            Some(Condition::Neq) => !self.flags.zero,
            Some(Condition::Gr) => !self.flags.negative,
            Some(Condition::L) => self.flags.negative,
            None => {
                log::warn!(
                    "[CPU] Unknown branch condition {} in {} at {:#010x}, not taken",
                    insn.cond,
                    insn,
                    self.ip
                );
                false
            }
        }
    }
}
