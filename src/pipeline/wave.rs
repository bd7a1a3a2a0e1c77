//! Concurrent wave scheduling over the converter.

use rayon::prelude::*;

use crate::{pipeline::Converter, refs::ProgramMethod, Result};

/// A bounded batch of methods safe to process concurrently.
pub type Wave = Vec<ProgramMethod>;

/// Runs waves of methods through a [`Converter`].
///
/// Each wave is processed with a rayon parallel iterator; between waves
/// the scheduler holds the only reference and runs the single-threaded
/// boundary phase: feedback commit, single-caller removals and stale
/// resets. Methods reset as stale are appended to a trailing wave so a
/// run always converges.
pub struct WaveScheduler<'a> {
    converter: Converter<'a>,
}

impl<'a> WaveScheduler<'a> {
    /// Wraps a converter for wave execution.
    #[must_use]
    pub fn new(converter: Converter<'a>) -> Self {
        WaveScheduler { converter }
    }

    /// The wrapped converter, for inspecting state and warnings after a
    /// run.
    #[must_use]
    pub fn converter(&self) -> &Converter<'a> {
        &self.converter
    }

    /// Processes every wave in order, committing feedback between waves.
    ///
    /// There is no cancellation: the run either completes or fails with
    /// the first hard error.
    ///
    /// # Errors
    ///
    /// Propagates the first per-method hard failure of each wave.
    pub fn run(&mut self, waves: Vec<Wave>) -> Result<()> {
        let mut pending = std::collections::VecDeque::from(waves);
        while let Some(wave) = pending.pop_front() {
            let converter = &self.converter;
            wave.par_iter()
                .map(|&method| converter.process_method(method))
                .collect::<Result<Vec<()>>>()?;

            let committed = self.converter.commit_wave();
            if !committed.stale.is_empty() {
                let mut rebuilt = Vec::new();
                for method in committed.stale {
                    if let Some(desc) = self.converter_view_holder(method) {
                        rebuilt.push(desc);
                    }
                }
                if !rebuilt.is_empty() {
                    pending.push_back(rebuilt);
                }
            }
        }
        Ok(())
    }

    fn converter_view_holder(&self, method: crate::refs::MethodId) -> Option<ProgramMethod> {
        let holder = self
            .converter
            .view()
            .interner
            .method_desc(method)?
            .holder;
        Some(ProgramMethod::new(holder, method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{CodeBlock, CodeInst, CodeObject, ConstValue},
        lens::LensChain,
        refs::{
            AccessFlags, ClassDef, MethodDef, MethodId, MethodProto, ProgramView, TypeId,
        },
    };
    use crate::lens::LensId;

    fn setup() -> (ProgramView, LensChain, TypeId) {
        let view = ProgramView::new();
        let holder = view.interner.intern_type("com/example/A");
        view.add_class(ClassDef {
            ty: holder,
            super_type: None,
            interfaces: Vec::new(),
            flags: AccessFlags::PUBLIC,
            nest_host: None,
            methods: Vec::new(),
            fields: Vec::new(),
            has_class_initializer: false,
        });
        (view, LensChain::new(), holder)
    }

    fn add_method(view: &ProgramView, holder: TypeId, name: &str, code: CodeObject) -> MethodId {
        let int = view.interner.intern_type("I");
        let id = view
            .interner
            .intern_method(holder, name, MethodProto::new(Some(int), Vec::new()));
        let mut class = view.definition_for(holder).unwrap().value().clone();
        class.methods.push(id);
        view.add_class(class);
        view.add_method(MethodDef {
            id,
            flags: AccessFlags::PUBLIC | AccessFlags::STATIC,
            code: Some(code),
            code_lens: LensId::BASE,
        });
        id
    }

    fn const_body(value: i64) -> CodeObject {
        let mut code = CodeObject::new(0);
        code.num_registers = 1;
        code.blocks.push(CodeBlock {
            instructions: vec![
                CodeInst::Const {
                    dest: 0,
                    value: ConstValue::Number(value),
                },
                CodeInst::Return { src: Some(0) },
            ],
            catches: Vec::new(),
        });
        code
    }

    fn calling_body(callee: MethodId) -> CodeObject {
        let mut code = CodeObject::new(0);
        code.num_registers = 1;
        code.blocks.push(CodeBlock {
            instructions: vec![
                CodeInst::InvokeStatic {
                    dest: Some(0),
                    method: callee,
                    args: Vec::new(),
                },
                CodeInst::Return { src: Some(0) },
            ],
            catches: Vec::new(),
        });
        code
    }

    #[test]
    fn test_wave_commits_info_at_boundary() {
        let (view, chain, holder) = setup();
        let a = add_method(&view, holder, "a", const_body(1));
        let b = add_method(&view, holder, "b", const_body(2));
        let mut scheduler = WaveScheduler::new(Converter::new(&view, &chain));

        scheduler
            .run(vec![vec![
                ProgramMethod::new(holder, a),
                ProgramMethod::new(holder, b),
            ]])
            .unwrap();

        let store = scheduler.converter().store();
        assert_eq!(
            store.get(a).unwrap().returns_constant,
            Some(ConstValue::Number(1))
        );
        assert_eq!(
            store.get(b).unwrap().returns_constant,
            Some(ConstValue::Number(2))
        );
    }

    #[test]
    fn test_single_caller_removed_at_boundary() {
        let (view, chain, holder) = setup();
        let callee = add_method(&view, holder, "callee", const_body(7));
        view.set_call_count(callee, 1);
        let caller = add_method(&view, holder, "caller", calling_body(callee));
        let mut scheduler = WaveScheduler::new(Converter::new(&view, &chain));

        scheduler
            .run(vec![vec![ProgramMethod::new(holder, caller)]])
            .unwrap();

        assert!(view.method_def(callee).is_none());
        // The caller's finalized body returns the spliced constant.
        let def = view.method_def(caller).unwrap();
        let code = def.code.as_ref().unwrap();
        assert!(code.blocks.iter().any(|b| b.instructions.iter().any(|i| {
            matches!(
                i,
                CodeInst::Const {
                    value: ConstValue::Number(7),
                    ..
                }
            )
        })));
        assert!(!code.blocks.iter().any(|b| b
            .instructions
            .iter()
            .any(|i| matches!(i, CodeInst::InvokeStatic { .. }))));
    }

    #[test]
    fn test_stale_method_is_reprocessed() {
        let (view, chain, holder) = setup();
        let m = add_method(&view, holder, "m", const_body(3));
        let mut scheduler = WaveScheduler::new(Converter::new(&view, &chain));
        scheduler
            .run(vec![vec![ProgramMethod::new(holder, m)]])
            .unwrap();

        scheduler.converter().mark_stale(m);
        scheduler.run(vec![Vec::new()]).unwrap();
        // The trailing rebuild wave reprocessed it to completion.
        assert_eq!(
            scheduler.converter().state(m),
            crate::pipeline::MethodState::Processed
        );
    }
}
