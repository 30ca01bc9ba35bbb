//! Demo server: registers two handlers and runs one worker per CPU, either
//! each owning its own `SO_REUSEPORT` listen socket or sharing one listen
//! socket behind a round-robin acceptor thread, selected by
//! `ServerConfig::reuse_port`. Pass `--shared-accept` to exercise the latter.

use std::thread;

use rask::distribution::{bind_shared_listener, spawn_acceptor, RoundRobinDistribution};
use rask::registry::{RegisterUrlHandlers, RegistryBroadcaster};
use rask::response::HttpResponse;
use rask::{ServerConfig, Worker};

fn main() {
    env_logger::init();

    let mut config = ServerConfig::new("127.0.0.1:8080".parse().unwrap());
    config.reuse_port = std::env::args().nth(1).as_deref() != Some("--shared-accept");
    config.validate().expect("invalid server configuration");

    let hello = RegisterUrlHandlers::single("/hello", |_: &rask::HttpExchange| {
        HttpResponse::ok_with_content_type(b"hi".as_slice(), "text/plain")
    });
    let health = RegisterUrlHandlers::single("/health", |_: &rask::HttpExchange| HttpResponse::no_content());

    if config.reuse_port {
        run_with_reuse_port(&config, &hello, &health);
    } else {
        run_with_shared_acceptor(&config, hello, health);
    }
}

/// Each worker binds its own `SO_REUSEPORT` listen socket; the kernel
/// distributes incoming connections, no inter-thread handoff exists.
fn run_with_reuse_port(config: &ServerConfig, hello: &RegisterUrlHandlers, health: &RegisterUrlHandlers) {
    let mut handles = Vec::with_capacity(config.worker_count);
    for id in 0..config.worker_count {
        let worker_config = config.worker_config(id);
        let hello = hello.clone();
        let health = health.clone();
        handles.push(thread::spawn(move || {
            let mut worker = Worker::with_own_listener(worker_config).expect("failed to bind listener");
            worker.register_handlers(&hello);
            worker.register_handlers(&health);
            if let Err(e) = worker.run() {
                log::error!("worker {id} exited: {e}");
            }
        }));
    }
    for handle in handles {
        let _ = handle.join();
    }
}

/// One shared listen socket behind a dedicated acceptor thread that fans
/// accepted connections out to workers in round robin, and a registry
/// broadcaster demonstrating the post-startup handler-registration path.
fn run_with_shared_acceptor(config: &ServerConfig, hello: RegisterUrlHandlers, health: RegisterUrlHandlers) {
    let listener =
        bind_shared_listener(config.address, config.listen_backlog).expect("failed to bind shared listen socket");
    let (distribution, accept_rxs) =
        RoundRobinDistribution::new(config.worker_count, config.listen_backlog as usize);
    let (broadcaster, update_rxs) = RegistryBroadcaster::new(config.worker_count, 16);
    let acceptor = spawn_acceptor(listener, distribution);

    let mut handles = Vec::with_capacity(config.worker_count);
    for (id, (accept_rx, update_rx)) in accept_rxs.into_iter().zip(update_rxs).enumerate() {
        let worker_config = config.worker_config(id);
        let hello = hello.clone();
        let health = health.clone();
        handles.push(thread::spawn(move || {
            let mut worker = Worker::with_accept_channel(worker_config, accept_rx).expect("failed to build worker");
            worker.register_handlers(&hello);
            worker.register_handlers(&health);
            worker.set_registry_updates(update_rx);
            if let Err(e) = worker.run() {
                log::error!("worker {id} exited: {e}");
            }
        }));
    }

    // Registered after every worker is already running: reaches all of them
    // through the broadcaster's per-worker channel.
    let status = RegisterUrlHandlers::single("/status", |_: &rask::HttpExchange| HttpResponse::no_content());
    broadcaster.broadcast(status);

    for handle in handles {
        let _ = handle.join();
    }
    let _ = acceptor.join();
}
