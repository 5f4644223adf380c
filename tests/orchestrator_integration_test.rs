//! 编排器集成测试：场景与运行循环

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use diffeq_explorer::backend::MockBackend;
    use diffeq_explorer::config::ModelSection;
    use diffeq_explorer::core::{ModelError, TIME_GRID_LEN};
    use diffeq_explorer::{spawn_orchestrator, Intent, Orchestrator};
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;

    const TWO_INPUT_ONE_OUTPUT: &str = "in = [r, k]\nG_i { r * k }\nout_i { y }";

    fn orchestrator(source: &str) -> Orchestrator {
        Orchestrator::new(ModelSection::default()).with_source(source)
    }

    fn assert_shape(orch: &Orchestrator) {
        let generation = orch.generation().unwrap();
        assert_eq!(generation.timepoints().len(), TIME_GRID_LEN);
        assert_eq!(
            generation.outputs().len(),
            generation.timepoints().len() * generation.number_of_outputs()
        );
        if let Some(d) = generation.output_tangents() {
            assert_eq!(d.len(), generation.outputs().len());
        }
    }

    #[tokio::test]
    async fn test_scenario_a_default_two_input_one_output() {
        let backend = MockBackend::default();
        let mut orch = orchestrator(TWO_INPUT_ONE_OUTPUT);
        orch.compile(&backend).await.unwrap();

        let generation = orch.generation().unwrap();
        assert_eq!(generation.inputs().as_slice(), &[1.0, 1.0]);
        assert_eq!(generation.timepoints().as_slice(), &[0.0, 10.0]);
        assert_eq!(generation.outputs().len(), 2);
        assert_shape(&orch);
    }

    #[tokio::test]
    async fn test_scenario_b_set_input_resolves_on_fixed_grid() {
        let backend = MockBackend::default();
        let stats = backend.stats();
        let mut orch = orchestrator(TWO_INPUT_ONE_OUTPUT);
        orch.compile(&backend).await.unwrap();
        let solves = stats.solve_calls();

        orch.apply(Intent::SetInput {
            index: 0,
            value: 5.0,
            tangent: None,
        })
        .unwrap();
        assert_eq!(stats.solve_calls(), solves + 1);
        assert_eq!(orch.generation().unwrap().timepoints().as_slice(), &[0.0, 10.0]);
        assert_shape(&orch);
    }

    #[tokio::test]
    async fn test_scenario_c_invalid_source() {
        let backend = MockBackend::default();
        let mut orch = orchestrator("G_i { r * k ");
        orch.compile(&backend).await.unwrap();
        assert!(orch.state().compile_error.is_some());
        assert!(orch.generation().is_none());

        orch.edit_source(TWO_INPUT_ONE_OUTPUT);
        orch.compile(&backend).await.unwrap();
        assert!(orch.state().compile_error.is_none());
        let id = orch.generation().unwrap().id();

        orch.edit_source("out_i { y, ");
        orch.compile(&backend).await.unwrap();
        assert!(orch.state().compile_error.is_some());
        assert_eq!(orch.generation().unwrap().id(), id);
    }

    #[tokio::test]
    async fn test_scenario_d_solve_failure_keeps_outputs() {
        let backend = MockBackend::default();
        let mut orch = orchestrator(TWO_INPUT_ONE_OUTPUT);
        orch.compile(&backend).await.unwrap();
        let before = orch.generation().unwrap().outputs().clone();

        orch.set_input(1, -2.0, None).unwrap();
        assert!(orch
            .state()
            .solve_error
            .as_deref()
            .unwrap()
            .contains("failed to converge"));
        assert_eq!(orch.generation().unwrap().outputs(), &before);
        assert_shape(&orch);
    }

    #[tokio::test]
    async fn test_scenario_e_set_horizon() {
        let backend = MockBackend::default();
        let stats = backend.stats();
        let mut orch = orchestrator(TWO_INPUT_ONE_OUTPUT);
        orch.compile(&backend).await.unwrap();
        let solves = stats.solve_calls();

        orch.apply(Intent::SetHorizon(20.0)).unwrap();
        assert_eq!(orch.generation().unwrap().timepoints().as_slice(), &[0.0, 20.0]);
        assert_eq!(stats.solve_calls(), solves + 1);
        assert_shape(&orch);
    }

    #[tokio::test]
    async fn test_compile_succeeds_but_first_solve_fails() {
        let backend = MockBackend::default();
        let mut orch = Orchestrator::new(ModelSection {
            input_value: -1.0,
            ..ModelSection::default()
        })
        .with_source(TWO_INPUT_ONE_OUTPUT);
        orch.compile(&backend).await.unwrap();

        let generation = orch.generation().unwrap();
        assert_eq!(generation.inputs().as_slice(), &[-1.0, -1.0]);
        assert_eq!(generation.outputs().as_slice(), &[0.0, 0.0]);
        assert!(orch.state().compile_error.is_none());
        assert!(orch
            .state()
            .solve_error
            .as_deref()
            .unwrap()
            .contains("failed to converge"));
        assert_shape(&orch);

        orch.set_input(0, 1.0, None).unwrap();
        orch.set_input(1, 1.0, None).unwrap();
        assert!(orch.state().solve_error.is_none());
        assert_eq!(orch.generation().unwrap().outputs().as_slice(), &[0.0, 20.0]);
    }

    #[tokio::test]
    async fn test_successful_compile_clears_both_errors() {
        let backend = MockBackend::default();
        let mut orch = orchestrator(TWO_INPUT_ONE_OUTPUT);
        orch.compile(&backend).await.unwrap();
        orch.set_input(0, -1.0, None).unwrap();
        assert!(orch.state().solve_error.is_some());

        orch.edit_source("{");
        orch.compile(&backend).await.unwrap();
        assert!(orch.state().compile_error.is_some());
        assert!(orch.state().solve_error.is_some());

        orch.edit_source(TWO_INPUT_ONE_OUTPUT);
        orch.compile(&backend).await.unwrap();
        assert!(orch.state().compile_error.is_none());
        assert!(orch.state().solve_error.is_none());
        assert_eq!(orch.generation().unwrap().inputs().as_slice(), &[1.0, 1.0]);
    }

    #[tokio::test]
    async fn test_dense_backend_output_keeps_two_point_grid() {
        let backend = MockBackend::default().with_dense_output(50);
        let mut orch = orchestrator(TWO_INPUT_ONE_OUTPUT);
        orch.compile(&backend).await.unwrap();
        assert_shape(&orch);

        orch.set_input(0, 3.0, Some(1.0)).unwrap();
        orch.set_horizon(4.0).unwrap();
        assert!(orch.state().solve_error.is_none());
        assert_eq!(orch.generation().unwrap().timepoints().as_slice(), &[0.0, 4.0]);
        assert_eq!(orch.generation().unwrap().outputs().as_slice(), &[0.0, 16.0]);
        assert_shape(&orch);
    }

    #[tokio::test]
    async fn test_view_series_matches_buffers() {
        let backend = MockBackend::default();
        let mut orch = orchestrator("in = [a]\nout_i { y, z }");
        orch.compile(&backend).await.unwrap();
        orch.set_input(0, 2.0, Some(0.5)).unwrap();

        let view = orch.view();
        assert_eq!(view.inputs.len(), 1);
        assert_eq!(view.inputs[0].tangent, Some(0.5));
        assert_eq!(view.series.len(), 2);
        let last = view.series[1].points[1];
        assert_eq!(last.time, 10.0);
        assert_eq!(last.value, 40.0);
        assert_eq!(last.tangent, Some(10.0));
    }

    #[tokio::test]
    async fn test_runtime_single_flight_and_edit_during_compile() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(MockBackend::default().with_gate(gate.clone()));
        let stats = backend.stats();
        let (tx, mut rx, task) = spawn_orchestrator(
            orchestrator("in = [a, b, c]\nout_i { y }"),
            backend,
            CancellationToken::new(),
        );

        tx.send(Intent::Compile).unwrap();
        tx.send(Intent::Compile).unwrap();
        tx.send(Intent::EditSource("in = [a]\nout_i { y }".to_string()))
            .unwrap();

        let view = rx
            .wait_for(|v| v.source_text.starts_with("in = [a]"))
            .await
            .unwrap()
            .clone();
        assert!(view.compiling);
        assert!(view.generation.is_none());

        gate.notify_one();
        let view = rx.wait_for(|v| v.generation.is_some()).await.unwrap().clone();
        assert!(!view.compiling);
        assert_eq!(view.inputs.len(), 3);
        assert_eq!(view.source_text, "in = [a]\nout_i { y }");
        assert_eq!(stats.compile_calls(), 1);

        tx.send(Intent::Quit).unwrap();
        task.await.unwrap();
        assert_eq!(stats.handles_released(), 1);
    }

    #[tokio::test]
    async fn test_runtime_reports_defect_before_compile() {
        let backend = Arc::new(MockBackend::default());
        let (tx, mut rx, task) = spawn_orchestrator(
            orchestrator(TWO_INPUT_ONE_OUTPUT),
            backend,
            CancellationToken::new(),
        );

        tx.send(Intent::SetHorizon(5.0)).unwrap();
        let view = rx.wait_for(|v| v.defect.is_some()).await.unwrap().clone();
        let expected = ModelError::NoModel {
            operation: "set_horizon",
        }
        .to_string();
        assert_eq!(view.defect.as_deref(), Some(expected.as_str()));
        assert_eq!(view.horizon, 10.0);

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_runtime_backend_fault_and_dismiss() {
        let backend = Arc::new(MockBackend::default());
        backend.set_unreachable(true);
        let shutdown = CancellationToken::new();
        let (tx, mut rx, task) = spawn_orchestrator(
            orchestrator(TWO_INPUT_ONE_OUTPUT),
            backend,
            shutdown.clone(),
        );

        tx.send(Intent::Compile).unwrap();
        let view = rx
            .wait_for(|v| v.infrastructure_error.is_some())
            .await
            .unwrap()
            .clone();
        assert!(view.compile_error.is_none());
        let report = view.infrastructure_report().unwrap();
        assert_eq!(report.source_text, TWO_INPUT_ONE_OUTPUT);

        tx.send(Intent::DismissInfrastructureError).unwrap();
        rx.wait_for(|v| v.infrastructure_error.is_none())
            .await
            .unwrap();

        shutdown.cancel();
        task.await.unwrap();
    }
}
