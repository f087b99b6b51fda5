//! Property tests: arbitrary edit/tick interleavings never wedge a chain.

mod common;

use common::builders::CountingProcessor;
use cortexflow::pipeline::nodes::ReplaySource;
use cortexflow::pipeline::Pipeline;
use cortexflow::{AnyBehavior, AttrValue, BuiltinBehavior, SampleBlock, StreamInfo};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    /// Queue a block of this many samples.
    Feed(usize),
    /// Write the processor's reset-triggering attribute.
    Mutate,
    /// Disable or enable the processor.
    SetDisabled(bool),
    /// Run one external tick.
    Tick,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1usize..=4).prop_map(Op::Feed),
        Just(Op::Mutate),
        any::<bool>().prop_map(Op::SetDisabled),
        Just(Op::Tick),
    ]
}

proptest! {
    #[test]
    fn chain_survives_arbitrary_editing(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let mut pipeline = Pipeline::new();
        let (source, feed_tx) = ReplaySource::channel(StreamInfo::eeg(1, 100.0), 64);
        let src = pipeline.add_node(AnyBehavior::Builtin(BuiltinBehavior::ReplaySource(source)));
        pipeline.set_source(src).unwrap();
        let (processor, _counts) = CountingProcessor::new(false);
        let id = pipeline.add_node(AnyBehavior::Plugin(Box::new(processor)));
        pipeline.add_processor(id).unwrap();
        pipeline.initialize_all().unwrap();

        for op in &ops {
            match op {
                Op::Feed(samples) => feed_tx.send(SampleBlock::zeros(1, *samples)).unwrap(),
                Op::Mutate => pipeline
                    .graph_mut()
                    .set_attr(id, "mode", &AttrValue::Str("edited".into()))
                    .unwrap(),
                Op::SetDisabled(disabled) => {
                    pipeline.graph_mut().set_disabled(id, *disabled).unwrap()
                }
                Op::Tick => pipeline.update_all().unwrap(),
            }
        }

        // Two data-bearing ticks drain whatever the sequence left latched:
        // the first resolves a pending reset, the second is a plain update.
        pipeline.graph_mut().set_disabled(id, false).unwrap();
        feed_tx.send(SampleBlock::zeros(1, 2)).unwrap();
        pipeline.update_all().unwrap();
        feed_tx.send(SampleBlock::zeros(1, 2)).unwrap();
        pipeline.update_all().unwrap();

        let status = pipeline.graph().status(id).unwrap();
        prop_assert!(status.initialized);
        prop_assert!(!status.reset_requested);
        prop_assert!(!status.reinit_requested);
        prop_assert!(!status.input_history_invalid);

        let output = pipeline.graph().output(id).unwrap();
        prop_assert!(output.is_some());
        prop_assert_eq!(output.unwrap().sample_count(), 2);
    }

    #[test]
    fn append_preserves_sample_accounting(
        a_samples in 0usize..6,
        b_samples in 0usize..6,
        channels in 1usize..5,
    ) {
        let mut a = SampleBlock::zeros(channels, a_samples);
        let b = SampleBlock::zeros(channels, b_samples);
        a.append_samples(&b).unwrap();
        prop_assert_eq!(a.sample_count(), a_samples + b_samples);
        prop_assert_eq!(a.channel_count(), channels);
    }

    #[test]
    fn ragged_rows_never_build_a_block(
        lengths in prop::collection::vec(0usize..5, 1..5)
    ) {
        let rows: Vec<Vec<f64>> = lengths.iter().map(|&l| vec![0.0; l]).collect();
        let uniform = lengths.iter().all(|&l| l == lengths[0]);
        prop_assert_eq!(SampleBlock::from_rows(&rows).is_ok(), uniform);
    }
}
