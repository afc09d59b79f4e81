mod support;

mod tests {
    use std::cell::RefCell;

    use embassy_time::{Duration, Instant};
    use light_tower_link::{
        ByteTransport, DataItem, DataItemConfig, DeserializeError, EventChannel, EventQueue, LinkConfig,
        LinkError, NamedCallback, RxStatus, SerialDataLink, StringDataItem, Task, TaskScheduler,
        Transceiver, ValueKind,
    };

    use crate::support::MemoryTransport;

    const BANDS_FRAME: &str = "Bands,u8,2,2,01,02,3\n";

    fn at(millis: u64) -> Instant {
        Instant::from_millis(millis)
    }

    #[test]
    fn test_tx_sends_current_value_once() {
        let queue: EventChannel<4> = EventChannel::new();
        let bands = RefCell::new(DataItem::<u8, 2>::new("Bands", &[0, 0]).with_tx_queue(&queue));

        let mut link: SerialDataLink<'_, _, 4> =
            SerialDataLink::new("Link", MemoryTransport::new(), LinkConfig::default());
        link.bind(
            DataItemConfig::new("Bands", ValueKind::U8, 2, Transceiver::Tx).with_tx_queue(&queue),
            &bands,
        )
        .unwrap();

        assert_eq!(link.process_tx(at(0)), 0);

        bands.borrow_mut().set_value(&[9, 9]);
        bands.borrow_mut().set_value(&[1, 2]);
        assert_eq!(queue.count_waiting(), 2);
        assert_eq!(link.tx_pending(at(0)), true);

        // Pending events collapse into one frame with the latest value
        assert_eq!(link.process_tx(at(0)), 1);
        assert_eq!(link.transport_mut().take_written(), BANDS_FRAME);
        assert_eq!(queue.count_waiting(), 0);
        assert_eq!(link.frames_sent(), 1);

        assert_eq!(link.process_tx(at(1)), 0);
        assert_eq!(link.transport().written(), "");
    }

    #[test]
    fn test_rx_applies_frame() {
        let seen = RefCell::new(Vec::new());
        let record = |name: &str, value: &[u8]| seen.borrow_mut().push(format!("{}={:?}", name, value));
        let rx_queue: EventChannel<4> = EventChannel::new();
        let bands = RefCell::new(DataItem::<u8, 2>::new("Bands", &[0, 0]));
        bands
            .borrow_mut()
            .register_callback(NamedCallback::new("record", &record))
            .unwrap();

        let mut link: SerialDataLink<'_, _, 4> =
            SerialDataLink::new("Link", MemoryTransport::new(), LinkConfig::default());
        link.bind(
            DataItemConfig::new("Bands", ValueKind::U8, 2, Transceiver::Rx).with_rx_queue(&rx_queue),
            &bands,
        )
        .unwrap();

        assert_eq!(link.process_rx(at(0)), RxStatus::Idle);

        link.transport_mut().feed_str(BANDS_FRAME);
        assert_eq!(link.process_rx(at(0)), RxStatus::Applied { changed: true });
        assert_eq!(bands.borrow().value(), &[1, 2]);
        assert_eq!(seen.borrow().clone(), vec!["Bands=[1, 2]".to_string()]);
        assert_eq!(rx_queue.count_waiting(), 1);
        assert_eq!(link.frames_received(), 1);

        link.transport_mut().feed_str(BANDS_FRAME);
        assert_eq!(link.process_rx(at(1)), RxStatus::Applied { changed: false });
        assert_eq!(rx_queue.count_waiting(), 1);
    }

    #[test]
    fn test_rx_accumulates_partial_frames() {
        let bands = RefCell::new(DataItem::<u8, 2>::new("Bands", &[0, 0]));
        let mut link: SerialDataLink<'_, _, 4> =
            SerialDataLink::new("Link", MemoryTransport::new(), LinkConfig::default());
        link.bind(DataItemConfig::new("Bands", ValueKind::U8, 2, Transceiver::TxRx), &bands)
            .unwrap();

        link.transport_mut().feed_str("Bands,u8,2,");
        assert_eq!(link.process_rx(at(0)), RxStatus::Pending);
        link.transport_mut().feed_str("2,01,02,3\n");
        assert_eq!(link.process_rx(at(0)), RxStatus::Applied { changed: true });
    }

    #[test]
    fn test_rx_stops_after_one_frame() {
        let bands = RefCell::new(DataItem::<u8, 2>::new("Bands", &[0, 0]));
        let mut link: SerialDataLink<'_, _, 4> =
            SerialDataLink::new("Link", MemoryTransport::new(), LinkConfig::default());
        link.bind(DataItemConfig::new("Bands", ValueKind::U8, 2, Transceiver::Rx), &bands)
            .unwrap();

        link.transport_mut().feed_str(BANDS_FRAME);
        link.transport_mut().feed_str("Bands,u8,2,2,03,04,7\n");
        assert_eq!(link.process_rx(at(0)), RxStatus::Applied { changed: true });
        assert_eq!(bands.borrow().value(), &[1, 2]);
        assert_eq!(link.transport().available(), 21);

        assert_eq!(link.process_rx(at(0)), RxStatus::Applied { changed: true });
        assert_eq!(bands.borrow().value(), &[3, 4]);
    }

    #[test]
    fn test_rx_ignores_unknown_and_tx_only_items() {
        let bands = RefCell::new(DataItem::<u8, 2>::new("Bands", &[0, 0]));
        let mut link: SerialDataLink<'_, _, 4> =
            SerialDataLink::new("Link", MemoryTransport::new(), LinkConfig::default());
        link.bind(DataItemConfig::new("Bands", ValueKind::U8, 2, Transceiver::Tx), &bands)
            .unwrap();

        link.transport_mut().feed_str("Other,u8,1,1,01,1\n");
        assert_eq!(link.process_rx(at(0)), RxStatus::Ignored);

        link.transport_mut().feed_str(BANDS_FRAME);
        assert_eq!(link.process_rx(at(0)), RxStatus::Ignored);
        assert_eq!(bands.borrow().value(), &[0, 0]);
    }

    #[test]
    fn test_rx_rejects_malformed_frame() {
        let bands = RefCell::new(DataItem::<u8, 2>::new("Bands", &[0, 0]));
        let mut link: SerialDataLink<'_, _, 4> =
            SerialDataLink::new("Link", MemoryTransport::new(), LinkConfig::default());
        link.bind(DataItemConfig::new("Bands", ValueKind::U8, 2, Transceiver::Rx), &bands)
            .unwrap();

        link.transport_mut().feed_str("Bands,u8,2,2,01,02,4\n");
        assert_eq!(
            link.process_rx(at(0)),
            RxStatus::Malformed(DeserializeError::ChecksumMismatch {
                expected: 4,
                computed: 3
            })
        );
        assert_eq!(bands.borrow().value(), &[0, 0]);
        assert_eq!(link.frames_received(), 0);
        assert_eq!(link.serializer().stats().failed(), 1);

        link.transport_mut().feed(&[b'B', 0xFF, b',', b'\n']);
        assert_eq!(
            link.process_rx(at(1)),
            RxStatus::Malformed(DeserializeError::InvalidUtf8)
        );
        assert_eq!(link.serializer().stats().failed(), 2);
    }

    #[test]
    fn test_rx_overflow_discards_buffer() {
        let bands = RefCell::new(DataItem::<u8, 2>::new("Bands", &[0, 0]));
        let config = LinkConfig {
            max_message_length: 24,
            ..LinkConfig::default()
        };
        let mut link: SerialDataLink<'_, _, 4> =
            SerialDataLink::new("Link", MemoryTransport::new(), config);
        link.bind(DataItemConfig::new("Bands", ValueKind::U8, 2, Transceiver::Rx), &bands)
            .unwrap();

        link.transport_mut().feed_str("0123456789012345678901234567890123456789");
        assert_eq!(link.process_rx(at(0)), RxStatus::Overflow);
        assert_eq!(link.overflow_count(), 1);
        // Processing stopped with the rest still unread
        assert_eq!(link.transport().available(), 16);

        link.transport_mut().rx.clear();
        link.transport_mut().feed_str(BANDS_FRAME);
        assert_eq!(link.process_rx(at(0)), RxStatus::Applied { changed: true });
    }

    #[test]
    fn test_custom_terminator() {
        let name = RefCell::new(StringDataItem::<50>::new("Name", ""));
        let config = LinkConfig {
            terminator: "\r\n",
            ..LinkConfig::default()
        };
        let mut link: SerialDataLink<'_, _, 4> =
            SerialDataLink::new("Link", MemoryTransport::new(), config);
        link.bind(DataItemConfig::new("Name", ValueKind::Text, 1, Transceiver::TxRx), &name)
            .unwrap();

        link.transport_mut().feed_str("Name,text,1,2,4142,131\n");
        assert_eq!(link.process_rx(at(0)), RxStatus::Pending);
        link.transport_mut().feed_str("\r\n");
        // The stray "\n" is trimmed off the frame
        assert_eq!(link.process_rx(at(0)), RxStatus::Applied { changed: true });
        assert_eq!(name.borrow().value(), "AB");

        link.send_now("Name", at(0)).unwrap();
        assert_eq!(link.transport().written(), "Name,text,1,2,4142,131\r\n");
        assert_eq!(link.send_now("Other", at(0)), Err(LinkError::UnknownItem));
    }

    #[test]
    fn test_heartbeat_retransmits() {
        let level = RefCell::new(DataItem::<u8, 1>::filled("Level", 7));
        let mut link: SerialDataLink<'_, _, 4> =
            SerialDataLink::new("Link", MemoryTransport::new(), LinkConfig::default());
        link.bind(
            DataItemConfig::new("Level", ValueKind::U8, 1, Transceiver::Tx)
                .with_heartbeat(Duration::from_millis(1000)),
            &level,
        )
        .unwrap();

        assert_eq!(link.process_tx(at(0)), 1);
        assert_eq!(link.process_tx(at(500)), 0);
        assert_eq!(link.tx_pending(at(999)), false);
        assert_eq!(link.process_tx(at(1000)), 1);
        assert_eq!(
            link.transport().written(),
            "Level,u8,1,1,07,7\nLevel,u8,1,1,07,7\n"
        );
    }

    #[test]
    fn test_bind_errors() {
        let bands = RefCell::new(DataItem::<u8, 2>::new("Bands", &[0, 0]));
        let other = RefCell::new(DataItem::<u8, 2>::new("Other", &[0, 0]));
        let mut link: SerialDataLink<'_, _, 1> =
            SerialDataLink::new("Link", MemoryTransport::new(), LinkConfig::default());

        assert_eq!(
            link.bind(DataItemConfig::new("Bands", ValueKind::U16, 2, Transceiver::Tx), &bands),
            Err(LinkError::SchemaMismatch)
        );
        assert_eq!(
            link.bind(DataItemConfig::new("Bands", ValueKind::U8, 3, Transceiver::Tx), &bands),
            Err(LinkError::SchemaMismatch)
        );
        assert_eq!(
            link.bind(DataItemConfig::new("Bands", ValueKind::U8, 2, Transceiver::Tx), &other),
            Err(LinkError::SchemaMismatch)
        );
        assert_eq!(
            link.bind(DataItemConfig::new("Ba,nds", ValueKind::U8, 2, Transceiver::Tx), &bands),
            Err(LinkError::InvalidName)
        );
        assert_eq!(
            link.bind(DataItemConfig::new(" Bands", ValueKind::U8, 2, Transceiver::Tx), &bands),
            Err(LinkError::InvalidName)
        );
        link.bind(DataItemConfig::new("Bands", ValueKind::U8, 2, Transceiver::Tx), &bands)
            .unwrap();
        assert_eq!(
            link.bind(DataItemConfig::new("Bands", ValueKind::U8, 2, Transceiver::Tx), &bands),
            Err(LinkError::DuplicateName)
        );
        assert_eq!(
            link.bind(DataItemConfig::new("Other", ValueKind::U8, 2, Transceiver::Tx), &other),
            Err(LinkError::TooManyItems)
        );
        assert_eq!(link.item_count(), 1);
        assert_eq!(link.unbind("Bands"), true);
        assert_eq!(link.item_count(), 0);
    }

    #[test]
    fn test_short_write_is_reported() {
        let queue: EventChannel<1> = EventChannel::new();
        let level = RefCell::new(DataItem::<u8, 1>::filled("Level", 7).with_tx_queue(&queue));
        let mut transport = MemoryTransport::new();
        transport.write_limit = Some(4);
        let mut link: SerialDataLink<'_, _, 4> =
            SerialDataLink::new("Link", transport, LinkConfig::default());
        link.bind(
            DataItemConfig::new("Level", ValueKind::U8, 1, Transceiver::Tx).with_tx_queue(&queue),
            &level,
        )
        .unwrap();

        level.borrow_mut().set(8);
        assert_eq!(link.process_tx(at(0)), 0);
        assert_eq!(link.frames_sent(), 0);
        assert_eq!(
            link.send_now("Level", at(0)),
            Err(LinkError::ShortWrite {
                written: 5,
                expected: 18
            })
        );
    }

    #[test]
    fn test_boards_stay_in_sync() {
        let tx_queue: EventChannel<4> = EventChannel::new();
        let local = RefCell::new(DataItem::<i16, 3>::new("Offsets", &[0, 0, 0]).with_tx_queue(&tx_queue));
        let remote = RefCell::new(DataItem::<i16, 3>::new("Offsets", &[0, 0, 0]));

        let mut sender: SerialDataLink<'_, _, 2> =
            SerialDataLink::new("Sender", MemoryTransport::new(), LinkConfig::default());
        sender
            .bind(
                DataItemConfig::new("Offsets", ValueKind::I16, 3, Transceiver::Tx).with_tx_queue(&tx_queue),
                &local,
            )
            .unwrap();
        let mut receiver: SerialDataLink<'_, _, 2> =
            SerialDataLink::new("Receiver", MemoryTransport::new(), LinkConfig::default());
        receiver
            .bind(DataItemConfig::new("Offsets", ValueKind::I16, 3, Transceiver::Rx), &remote)
            .unwrap();

        local.borrow_mut().set_value(&[-1, 256, 7]);
        sender.process_tx(at(0));
        let wire = sender.transport_mut().take_written();
        receiver.transport_mut().feed_str(&wire);
        assert_eq!(receiver.process_rx(at(0)), RxStatus::Applied { changed: true });
        assert_eq!(remote.borrow().value(), &[-1, 256, 7]);
    }

    #[test]
    fn test_non_ascii_names_round_trip() {
        let tx_queue: EventChannel<2> = EventChannel::new();
        let local = RefCell::new(DataItem::<u8, 1>::filled("Grün", 0).with_tx_queue(&tx_queue));
        let remote = RefCell::new(DataItem::<u8, 1>::filled("Grün", 0));

        let mut sender: SerialDataLink<'_, _, 2> =
            SerialDataLink::new("Sender", MemoryTransport::new(), LinkConfig::default());
        sender
            .bind(
                DataItemConfig::new("Grün", ValueKind::U8, 1, Transceiver::Tx).with_tx_queue(&tx_queue),
                &local,
            )
            .unwrap();
        let mut receiver: SerialDataLink<'_, _, 2> =
            SerialDataLink::new("Receiver", MemoryTransport::new(), LinkConfig::default());
        receiver
            .bind(DataItemConfig::new("Grün", ValueKind::U8, 1, Transceiver::Rx), &remote)
            .unwrap();

        local.borrow_mut().set(5);
        assert_eq!(sender.process_tx(at(0)), 1);
        let wire = sender.transport_mut().take_written();
        receiver.transport_mut().feed_str(&wire);
        assert_eq!(receiver.process_rx(at(0)), RxStatus::Applied { changed: true });
        assert_eq!(remote.borrow().value(), &[5]);
    }

    #[test]
    fn test_link_task_survives_bad_input() {
        let bands = RefCell::new(DataItem::<u8, 2>::new("Bands", &[0, 0]));
        let config = LinkConfig {
            max_message_length: 24,
            ..LinkConfig::default()
        };
        let mut link: SerialDataLink<'_, _, 4> =
            SerialDataLink::new("Link", MemoryTransport::new(), config);
        link.bind(DataItemConfig::new("Bands", ValueKind::U8, 2, Transceiver::Rx), &bands)
            .unwrap();
        link.transport_mut().feed_str("Bands,u8,2,2,01,02,4\n");
        link.transport_mut().feed_str("0123456789012345678901234567890");

        let mut scheduler: TaskScheduler<'_, 2> = TaskScheduler::new();
        let id = scheduler.register(&mut link).unwrap();
        scheduler.add_task(id).unwrap();
        scheduler.run_scheduler();
        scheduler.run_scheduler();
        assert_eq!(bands.borrow().value(), &[0, 0]);
        assert_eq!(scheduler.task(id).map(|task| task.can_run()), Some(true));
    }

    #[test]
    fn test_link_runs_as_task() {
        let bands = RefCell::new(DataItem::<u8, 2>::new("Bands", &[0, 0]));
        let mut link: SerialDataLink<'_, _, 4> =
            SerialDataLink::new("Link", MemoryTransport::new(), LinkConfig::default());
        link.bind(DataItemConfig::new("Bands", ValueKind::U8, 2, Transceiver::Rx), &bands)
            .unwrap();
        link.transport_mut().feed_str(BANDS_FRAME);

        let mut scheduler: TaskScheduler<'_, 2> = TaskScheduler::new();
        let id = scheduler.register(&mut link).unwrap();
        scheduler.add_task(id).unwrap();
        scheduler.run_scheduler();
        assert_eq!(bands.borrow().value(), &[1, 2]);

        scheduler.run_scheduler();
        assert_eq!(scheduler.task(id).map(|task| task.can_run()), Some(false));
    }
}
