use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::time::Duration;
use taskstream::streams::{ColumnIndex, ColumnTypes, InputStream, OutputStream, RecordSink, RecordSource};
use taskstream::workers::PassthroughWorker;
use taskstream::{Pipeline, Record, TaskDefinition, TaskQueue};

struct CountingSource {
    remaining: usize,
    columns: ColumnIndex,
    types: ColumnTypes,
}

impl RecordSource for CountingSource {
    fn init_stream(&mut self) -> taskstream::Result<()> {
        Ok(())
    }

    fn next_record(&mut self) -> taskstream::Result<Option<Record>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let mut record = Record::new();
        record.insert("n".to_string(), json!(self.remaining));
        Ok(Some(record))
    }

    fn columns(&self) -> &ColumnIndex {
        &self.columns
    }

    fn types(&self) -> &ColumnTypes {
        &self.types
    }
}

struct NullSink;

impl RecordSink for NullSink {
    fn init_stream(&mut self) -> taskstream::Result<()> {
        Ok(())
    }

    fn write(&mut self, task: &TaskDefinition) -> taskstream::Result<()> {
        black_box(task);
        Ok(())
    }

    fn close(&mut self) -> taskstream::Result<()> {
        Ok(())
    }
}

fn benchmark_queue_put_get(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    c.bench_function("queue_put_get_mark_done", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let queue = TaskQueue::new(64).unwrap();
                for i in 0..64u32 {
                    queue.put(i).await.unwrap();
                }
                for _ in 0..64 {
                    black_box(queue.get().await.unwrap());
                    queue.mark_done().unwrap();
                }
                queue.join().await.unwrap();
            })
        })
    });
}

fn benchmark_passthrough_pipeline(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("passthrough_pipeline_1000_records");
    for num_workers in [1usize, 4] {
        group.bench_with_input(
            BenchmarkId::from_parameter(num_workers),
            &num_workers,
            |b, &num_workers| {
                b.iter(|| {
                    runtime.block_on(async {
                        let source = CountingSource {
                            remaining: 1000,
                            columns: ColumnIndex::new(),
                            types: ColumnTypes::new(),
                        };
                        Pipeline::builder()
                            .input(InputStream::new(source, 128).unwrap())
                            .worker(PassthroughWorker)
                            .output(OutputStream::with_capacity(NullSink, 128).unwrap())
                            .num_workers(num_workers)
                            .poll_interval(Duration::from_millis(5))
                            .build()
                            .unwrap()
                            .run()
                            .await
                            .unwrap()
                    })
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, benchmark_queue_put_get, benchmark_passthrough_pipeline);
criterion_main!(benches);
