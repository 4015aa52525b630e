mod common;

use std::collections::HashMap;

use common::{FS, VS, command, headless, records, restream, streamed, triangles};
use xian_render_core::engine::batch::{DrawHandle, InstanceData, InstanceHandle, MaterialId};
use xian_render_core::engine::gpu::{DeviceCommand, DrawArraysIndirectCommand, PrimitiveType};
use xian_render_core::engine::pass::PassId;
use xian_render_core::engine::{RenderError, Renderer};

fn material(renderer: &mut Renderer, name: &str) -> MaterialId {
    renderer
        .register_material(name, VS, FS, PassId(0))
        .expect("material registers")
}

fn single_batch_commands(renderer: &Renderer, material: MaterialId) -> Vec<DrawArraysIndirectCommand> {
    let material = renderer.registry().material(material).expect("material exists");
    assert_eq!(material.batch_count(), 1);
    let (_, batch) = material.batches().next().expect("one batch");
    let commands = batch.commands().expect("batch written");
    (0..batch.draws().len())
        .map(|slot| command(renderer, commands, slot))
        .collect()
}

#[test]
fn single_draw_writes_one_command_and_one_record() {
    let (mut renderer, _platform) = headless(false);
    let id = material(&mut renderer, "M");
    let desc = triangles(&mut renderer, 3);
    let draw = renderer.submit_draw(id, desc).unwrap();
    let data = InstanceData::new(7, 0, 0);
    renderer.add_instance(draw, data).unwrap();

    renderer.render_frame().unwrap();

    let commands = single_batch_commands(&renderer, id);
    let range = *renderer.registry().draw(draw).unwrap().instance_range().unwrap();
    assert_eq!(
        commands,
        vec![DrawArraysIndirectCommand {
            count: 3,
            instance_count: 1,
            first: 0,
            base_instance: (range.offset / 16) as u32,
        }]
    );
    assert_eq!(records(&renderer, &range), vec![data]);

    let report = renderer.last_report().unwrap();
    assert_eq!(report.flush.batches, 1);
    assert_eq!(report.flush.instances, 1);
    assert_eq!(report.draw_calls(), 1);
}

#[test]
fn draws_sharing_a_key_coalesce_into_one_batch() {
    let (mut renderer, _platform) = headless(false);
    let id = material(&mut renderer, "M");
    let desc = triangles(&mut renderer, 3);
    let first = renderer.submit_draw(id, desc).unwrap();
    let desc = triangles(&mut renderer, 6);
    let second = renderer.submit_draw(id, desc).unwrap();
    renderer.add_instance(first, InstanceData::new(0, 0, 0)).unwrap();
    renderer.add_instance(second, InstanceData::new(1, 0, 0)).unwrap();
    renderer.add_instance(second, InstanceData::new(2, 0, 0)).unwrap();

    renderer.render_frame().unwrap();
    let commands = single_batch_commands(&renderer, id);
    assert_eq!(commands.len(), 2);
    assert_eq!((commands[0].count, commands[0].instance_count), (3, 1));
    assert_eq!((commands[1].count, commands[1].instance_count), (6, 2));
    assert_ne!(commands[0].base_instance, commands[1].base_instance);

    restream(&mut renderer, &[first, second]);
    let desc = streamed(&mut renderer, PrimitiveType::Lines, 2);
    let lines = renderer.submit_draw(id, desc).unwrap();
    renderer.add_instance(lines, InstanceData::new(3, 0, 0)).unwrap();
    renderer.render_frame().unwrap();

    let material = renderer.registry().material(id).unwrap();
    assert_eq!(material.batch_count(), 2);
    assert_eq!(renderer.last_report().unwrap().flush.batches, 2);
    assert_eq!(renderer.last_report().unwrap().draw_calls(), 2);
}

#[test]
fn removing_an_instance_shrinks_the_written_range() {
    let (mut renderer, _platform) = headless(false);
    let id = material(&mut renderer, "M");
    let desc = triangles(&mut renderer, 3);
    let draw = renderer.submit_draw(id, desc).unwrap();
    let handles: Vec<InstanceHandle> = (0..3)
        .map(|index| renderer.add_instance(draw, InstanceData::new(index, 0, 0)).unwrap())
        .collect();
    renderer.render_frame().unwrap();
    let range = *renderer.registry().draw(draw).unwrap().instance_range().unwrap();
    assert_eq!(range.size, 3 * 16);

    let removed = renderer.remove_instance(handles[1]).unwrap();
    assert_eq!(removed, InstanceData::new(1, 0, 0));
    restream(&mut renderer, &[draw]);
    renderer.render_frame().unwrap();

    let range = *renderer.registry().draw(draw).unwrap().instance_range().unwrap();
    assert_eq!(range.size, 2 * 16);
    let written = records(&renderer, &range);
    assert_eq!(written, vec![InstanceData::new(0, 0, 0), InstanceData::new(2, 0, 0)]);
    assert!(!written.contains(&removed));
    assert_eq!(single_batch_commands(&renderer, id)[0].instance_count, 2);
}

#[test]
fn removed_draws_leave_no_command_behind() {
    let (mut renderer, _platform) = headless(false);
    let id = material(&mut renderer, "M");
    let desc = triangles(&mut renderer, 3);
    let keep = renderer.submit_draw(id, desc).unwrap();
    let desc = triangles(&mut renderer, 9);
    let dropped = renderer.submit_draw(id, desc).unwrap();
    renderer.add_instance(keep, InstanceData::new(0, 0, 0)).unwrap();
    renderer.add_instance(dropped, InstanceData::new(1, 0, 0)).unwrap();
    renderer.render_frame().unwrap();

    renderer.remove_draw(dropped).unwrap();
    assert!(renderer.registry().draw(dropped).is_err());
    restream(&mut renderer, &[keep]);
    renderer.render_frame().unwrap();

    let commands = single_batch_commands(&renderer, id);
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].count, 3);
}

#[test]
fn draws_reused_without_fresh_geometry_fail_the_frame() {
    let (mut renderer, platform) = headless(false);
    let id = material(&mut renderer, "M");
    let desc = triangles(&mut renderer, 3);
    let draw = renderer.submit_draw(id, desc).unwrap();
    renderer.add_instance(draw, InstanceData::new(0, 0, 0)).unwrap();
    renderer.render_frame().unwrap();
    let issued = platform.namespace().commands().len();

    // Streaming something else does not revive the draw's frame-0 range.
    common::stream(&mut renderer, 3);
    assert_eq!(
        renderer.render_frame().unwrap_err(),
        RenderError::StaleGeometry { streamed: 0, frame: 1 }
    );
    let multi_draws_after = platform
        .namespace()
        .commands()
        .into_iter()
        .skip(issued)
        .filter(|c| matches!(c, DeviceCommand::MultiDrawArraysIndirect { .. }))
        .count();
    assert_eq!(multi_draws_after, 0);

    restream(&mut renderer, &[draw]);
    renderer.render_frame().unwrap();
    assert_eq!(renderer.last_report().unwrap().draw_calls(), 1);
}

/// Small deterministic generator so churn runs are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) as u32
    }
}

#[test]
fn random_churn_matches_a_shadow_model() {
    let (mut renderer, _platform) = headless(false);
    let id = material(&mut renderer, "M");
    let mut draws: Vec<DrawHandle> = Vec::new();
    for count in 1..=4 {
        let desc = triangles(&mut renderer, count * 3);
        draws.push(renderer.submit_draw(id, desc).unwrap());
    }

    let mut rng = Lcg(0x5eed);
    let mut live: Vec<(InstanceHandle, InstanceData)> = Vec::new();
    let mut shadow: HashMap<DrawHandle, Vec<(InstanceHandle, InstanceData)>> = HashMap::new();

    for round in 0..12 {
        for _ in 0..40 {
            match rng.next() % 3 {
                0 | 1 if live.len() < 200 => {
                    let draw = draws[rng.next() as usize % draws.len()];
                    let data = InstanceData::new(rng.next() % 64, round, rng.next());
                    let handle = renderer.add_instance(draw, data).unwrap();
                    live.push((handle, data));
                    shadow.entry(draw).or_default().push((handle, data));
                }
                2 if !live.is_empty() => {
                    let at = rng.next() as usize % live.len();
                    let (handle, data) = live.swap_remove(at);
                    assert_eq!(renderer.remove_instance(handle).unwrap(), data);
                    let list = shadow.get_mut(&handle.draw).unwrap();
                    list.retain(|(entry, _)| *entry != handle);
                }
                _ if !live.is_empty() => {
                    let at = rng.next() as usize % live.len();
                    let data = InstanceData::new(rng.next() % 64, round, rng.next());
                    let handle = live[at].0;
                    renderer.update_instance(handle, data).unwrap();
                    live[at].1 = data;
                    for entry in shadow.get_mut(&handle.draw).unwrap().iter_mut() {
                        if entry.0 == handle {
                            entry.1 = data;
                        }
                    }
                }
                _ => {}
            }
        }

        if round > 0 {
            restream(&mut renderer, &draws);
        }
        renderer.render_frame().unwrap();

        let mut total = 0;
        let commands = single_batch_commands(&renderer, id);
        for (slot, draw) in draws.iter().enumerate() {
            let expected: Vec<InstanceData> = shadow
                .get(draw)
                .map(|list| list.iter().map(|(_, data)| *data).collect())
                .unwrap_or_default();
            assert_eq!(commands[slot].instance_count as usize, expected.len());
            match renderer.registry().draw(*draw).unwrap().instance_range() {
                Some(range) => assert_eq!(records(&renderer, range), expected),
                None => assert!(expected.is_empty()),
            }
            total += expected.len();
        }
        assert_eq!(total, renderer.registry().live_instances());
        assert_eq!(total, live.len());
    }
}
